//! Pull handle and active-pull marker types
//!
//! A `PullHandle` is the supervisor's reference to one running transcoder
//! subprocess. The subprocess itself is owned by the monitor task; the
//! handle only carries identity, the output target, and the termination
//! request channel, so nothing outside the supervisor can signal the
//! process directly.

use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::registry::SourceDescriptor;

/// Where a pull's media ends up.
#[derive(Debug, Clone)]
pub enum PullOutput {
    /// Segmented HLS under a per-stream directory
    Hls {
        dir: PathBuf,
        playlist_url: String,
    },
    /// Re-muxed push to the local RTMP ingest point
    Relay { url: String },
}

impl PullOutput {
    /// Playback URL written to the registry when the pull goes live.
    pub fn playback_url(&self) -> &str {
        match self {
            PullOutput::Hls { playlist_url, .. } => playlist_url,
            PullOutput::Relay { url } => url,
        }
    }
}

/// One live transcoder subprocess, keyed by admission token.
#[derive(Debug, Clone)]
pub struct PullHandle {
    /// Owning source identifier
    pub source_id: String,

    /// Short stream name (playback path segment)
    pub stream_name: String,

    /// Output target
    pub output: PullOutput,

    /// When the pull was started
    pub started_at: Instant,

    cancel: CancellationToken,
}

impl PullHandle {
    pub fn new(source: &SourceDescriptor, output: PullOutput, cancel: CancellationToken) -> Self {
        Self {
            source_id: source.id.clone(),
            stream_name: source.stream_name.clone(),
            output,
            started_at: Instant::now(),
            cancel,
        }
    }

    /// Ask the monitor task to terminate the subprocess.
    ///
    /// Returns immediately; exit handling runs asynchronously in the
    /// monitor task.
    pub(crate) fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Marker distinguishing supervisor-initiated pulls from external
/// publishers, keyed by stream name.
///
/// Exists only while the pull's subprocess runs; its presence lets the
/// authorization gate admit the stream without credentials.
#[derive(Debug, Clone)]
pub struct ActivePull {
    /// Admission token of the owning pull
    pub stream_key: String,

    /// Owning source identifier
    pub stream_id: String,

    /// Short stream name
    pub stream_name: String,
}

impl ActivePull {
    pub fn new(source: &SourceDescriptor) -> Self {
        Self {
            stream_key: source.stream_key.clone(),
            stream_id: source.id.clone(),
            stream_name: source.stream_name.clone(),
        }
    }
}
