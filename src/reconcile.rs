//! Status reconciliation
//!
//! Translates publish and playback lifecycle events into registry writes.
//! Every write is best-effort: a failed write is logged and dropped, and
//! the in-memory pull state that triggered it stays authoritative.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::gate::PublishRequest;
use crate::pull::ActivePulls;
use crate::registry::{StreamRegistry, StreamUpdate};

/// Playback session event payload: just the play path.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlayRequest {
    pub path: String,
}

impl PlayRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn stream_name(&self) -> Option<&str> {
        crate::gate::stream_name_from_path(&self.path)
    }
}

/// Mirrors process and playback lifecycle into the registry.
pub struct StatusReconciler {
    registry: Arc<dyn StreamRegistry>,
    pulls: Arc<ActivePulls>,
    config: Arc<IngestConfig>,
}

impl StatusReconciler {
    pub fn new(
        registry: Arc<dyn StreamRegistry>,
        pulls: Arc<ActivePulls>,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            registry,
            pulls,
            config,
        }
    }

    /// A publisher's stream is confirmed flowing.
    pub async fn on_publish_started(&self, request: &PublishRequest) {
        let Some(stream_name) = request.stream_name() else {
            debug!(path = %request.path, "publish confirmation with invalid path");
            return;
        };

        if self.pulls.contains(stream_name).await {
            // Pulled streams are marked live when the pull starts.
            info!(stream = %stream_name, "pulled stream confirmed live");
            return;
        }

        let Some(token) = request.token() else {
            debug!(stream = %stream_name, "publish confirmation without token");
            return;
        };

        let source = match self.registry.find_by_token(token).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                debug!(stream = %stream_name, "publish confirmation for unknown token");
                return;
            }
            Err(e) => {
                warn!(stream = %stream_name, error = %e, "registry lookup failed");
                return;
            }
        };

        info!(stream = %source.stream_name, "stream is live");
        let update = StreamUpdate::live(self.config.hls_url(&source.stream_name))
            .with_rtmp_path(&request.path);
        self.write(&source.id, update).await;
    }

    /// A publisher's stream ended.
    pub async fn on_publish_done(&self, request: &PublishRequest) {
        let Some(stream_name) = request.stream_name() else {
            debug!(path = %request.path, "publish end with invalid path");
            return;
        };

        if self.pulls.remove(stream_name).await {
            // Pull markers live exactly as long as the subprocess; the
            // monitor task owns the offline write.
            info!(stream = %stream_name, "pulled stream ended");
            return;
        }

        let Some(token) = request.token() else {
            debug!(stream = %stream_name, "publish end without token");
            return;
        };

        let source = match self.registry.find_by_token(token).await {
            Ok(Some(source)) => source,
            Ok(None) | Err(_) => {
                debug!(stream = %stream_name, "publish end for unknown token");
                return;
            }
        };

        info!(stream = %source.stream_name, "stream ended");
        self.write(&source.id, StreamUpdate::offline().with_viewers(0))
            .await;
    }

    /// A viewer session started.
    pub async fn on_play_started(&self, request: &PlayRequest) {
        if let Some(stream_name) = request.stream_name() {
            self.adjust_viewers(stream_name, 1).await;
        }
    }

    /// A viewer session ended.
    pub async fn on_play_done(&self, request: &PlayRequest) {
        if let Some(stream_name) = request.stream_name() {
            self.adjust_viewers(stream_name, -1).await;
        }
    }

    /// Read-modify-write of the viewer count with a floor of zero.
    ///
    /// Not atomic: concurrent joins and leaves can lose an update. That
    /// matches the registry's row semantics; the count is advisory.
    async fn adjust_viewers(&self, stream_name: &str, delta: i64) {
        match self.registry.viewer_count(stream_name).await {
            Ok(Some((id, count))) => {
                let next = (count + delta).max(0);
                self.write(&id, StreamUpdate::default().with_viewers(next))
                    .await;
            }
            Ok(None) => {
                debug!(stream = %stream_name, "viewer event for unknown stream");
            }
            Err(e) => {
                warn!(stream = %stream_name, error = %e, "viewer count read failed");
            }
        }
    }

    async fn write(&self, id: &str, update: StreamUpdate) {
        if let Err(e) = self.registry.update_stream(id, &update).await {
            warn!(stream_id = %id, error = %e, "registry write failed");
        }
    }
}
