//! Source directory sync
//!
//! Brings the set of running pulls in line with the registry's configured
//! sources: a full load at startup, then change-feed events for the rest
//! of the process lifetime. No polling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::Result;
use crate::pull::PullSupervisor;
use crate::registry::{ChangeEvent, StreamRegistry};

/// Keeps running pulls consistent with registry configuration.
pub struct SourceSync {
    supervisor: Arc<PullSupervisor>,
    registry: Arc<dyn StreamRegistry>,
}

impl SourceSync {
    pub fn new(supervisor: Arc<PullSupervisor>, registry: Arc<dyn StreamRegistry>) -> Self {
        Self {
            supervisor,
            registry,
        }
    }

    /// Load every configured pulled source and start it.
    ///
    /// Returns how many pulls were requested. A registry failure here is
    /// reported to the caller; the daemon keeps running and picks up
    /// sources from the change feed instead.
    pub async fn bootstrap(&self) -> Result<usize> {
        info!("loading pulled sources from registry");
        let sources = self.registry.fetch_pulled_sources().await?;

        if sources.is_empty() {
            info!("no pulled sources configured");
            return Ok(0);
        }

        info!(count = sources.len(), "found pulled sources");
        let count = sources.len();
        for source in sources {
            self.supervisor.start_pull(source).await;
        }

        Ok(count)
    }

    /// Consume change events until the feed closes.
    pub async fn run(&self, mut events: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        info!("change feed ended");
    }

    /// Apply one configuration change.
    pub async fn apply(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::SourceAdded(source) => {
                info!(stream = %source.stream_name, "new pulled source");
                self.supervisor.start_pull(source).await;
            }
            ChangeEvent::SourceRemoved(removed) => match removed.stream_key {
                Some(token) => {
                    // stop_pull is a no-op if this stream was never pulled
                    self.supervisor.stop_pull(&token).await;
                }
                None => {
                    debug!(
                        stream = ?removed.stream_name,
                        "delete event without admission token"
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::registry::testing::MemoryRegistry;
    use crate::registry::{IngestKind, RemovedSource, SourceDescriptor, StreamStatus};

    fn pulled(name: &str, token: &str) -> SourceDescriptor {
        SourceDescriptor {
            id: format!("id-{name}"),
            stream_name: name.to_string(),
            stream_key: token.to_string(),
            input_type: IngestKind::Rtsp,
            rtsp_url: Some("rtsp://camera.local/stream".to_string()),
            rtsp_username: None,
            rtsp_password: None,
            auto_restart: false,
            app: None,
        }
    }

    fn sync(registry: Arc<MemoryRegistry>) -> SourceSync {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::default()
            .media_root(dir.keep())
            .ffmpeg_path("/nonexistent/ffmpeg");
        let supervisor = PullSupervisor::new(
            Arc::clone(&registry) as Arc<dyn StreamRegistry>,
            Arc::new(config),
        );
        SourceSync::new(supervisor, registry)
    }

    #[tokio::test]
    async fn test_bootstrap_starts_each_pulled_source() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.add_source(pulled("cam-1", "tok-1"));
        registry.add_source(pulled("cam-2", "tok-2"));

        let sync = sync(Arc::clone(&registry));
        let started = sync.bootstrap().await.unwrap();

        assert_eq!(started, 2);
        // each start recorded its live transition
        assert!(!registry.updates_for("id-cam-1").await.is_empty());
        assert!(!registry.updates_for("id-cam-2").await.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_with_no_sources() {
        let registry = Arc::new(MemoryRegistry::new());
        let sync = sync(Arc::clone(&registry));

        assert_eq!(sync.bootstrap().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_event_triggers_exactly_one_start() {
        let registry = Arc::new(MemoryRegistry::new());
        let sync = sync(Arc::clone(&registry));

        sync.apply(ChangeEvent::SourceAdded(pulled("cam-3", "tok-3")))
            .await;

        let live_writes = registry
            .updates_for("id-cam-3")
            .await
            .iter()
            .filter(|u| u.status == Some(StreamStatus::Live))
            .count();
        assert_eq!(live_writes, 1);
    }

    #[tokio::test]
    async fn test_delete_event_for_unknown_stream_is_noop() {
        let registry = Arc::new(MemoryRegistry::new());
        let sync = sync(Arc::clone(&registry));

        sync.apply(ChangeEvent::SourceRemoved(RemovedSource {
            stream_key: Some("tok-unknown".to_string()),
            stream_name: None,
        }))
        .await;

        sync.apply(ChangeEvent::SourceRemoved(RemovedSource {
            stream_key: None,
            stream_name: Some("cam-x".to_string()),
        }))
        .await;
    }
}
