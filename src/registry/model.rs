//! Stream registry row and event types
//!
//! These mirror the rows the dashboard maintains. The supervisor only
//! reads source configuration and writes status projections; it never
//! treats these rows as the truth for whether a pull is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::IngestError;

/// How a stream gets its media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestKind {
    /// External encoder pushes to the RTMP ingest point
    Rtmp,
    /// The supervisor pulls from an RTSP origin
    Rtsp,
}

/// Durable stream status mirrored into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Offline,
    Live,
    Error,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStatus::Offline => write!(f, "offline"),
            StreamStatus::Live => write!(f, "live"),
            StreamStatus::Error => write!(f, "error"),
        }
    }
}

/// One configured camera/stream intended for ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable registry identifier
    pub id: String,

    /// Short name; keys the playback path and the active-pull map
    pub stream_name: String,

    /// Secret admission token; keys the process map. Never logged.
    pub stream_key: String,

    /// Push or pull
    pub input_type: IngestKind,

    /// Pull origin address (present for pulled sources)
    #[serde(default)]
    pub rtsp_url: Option<String>,

    /// Origin credentials stored separately from the address
    #[serde(default)]
    pub rtsp_username: Option<String>,

    #[serde(default)]
    pub rtsp_password: Option<String>,

    /// Relaunch the pull after a failed exit
    #[serde(default)]
    pub auto_restart: bool,

    /// Application namespace override; the configured default applies when unset
    #[serde(default)]
    pub app: Option<String>,
}

impl SourceDescriptor {
    /// Whether this source is pulled by the supervisor.
    pub fn is_pulled(&self) -> bool {
        self.input_type == IngestKind::Rtsp
    }

    /// Resolve the origin address, embedding stored credentials.
    ///
    /// The scheme must be `rtsp`. Credentials are percent-encoded by the
    /// URL writer, matching what the transcoder expects on the wire.
    pub fn origin_url(&self) -> Result<Url, IngestError> {
        let raw = self
            .rtsp_url
            .as_deref()
            .ok_or_else(|| IngestError::Origin(format!("{}: no origin configured", self.stream_name)))?;

        let mut url = Url::parse(raw)
            .map_err(|e| IngestError::Origin(format!("{}: {}", self.stream_name, e)))?;

        if url.scheme() != "rtsp" {
            return Err(IngestError::Origin(format!(
                "{}: unexpected scheme {}",
                self.stream_name,
                url.scheme()
            )));
        }

        if let (Some(user), Some(pass)) = (&self.rtsp_username, &self.rtsp_password) {
            url.set_username(user)
                .and_then(|_| url.set_password(Some(pass)))
                .map_err(|_| {
                    IngestError::Origin(format!("{}: origin cannot carry credentials", self.stream_name))
                })?;
        }

        Ok(url)
    }
}

/// Mask any embedded credential for log output.
pub fn masked_origin(url: &Url) -> String {
    if url.password().is_some() || !url.username().is_empty() {
        let mut masked = url.clone();
        let _ = masked.set_username("****");
        let _ = masked.set_password(Some("****"));
        masked.to_string()
    } else {
        url.to_string()
    }
}

/// Partial update applied to a stream row.
///
/// Only set fields are serialized, so one type covers every write the
/// reconciler and supervisor perform.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtmp_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl StreamUpdate {
    /// Stream went live now, playable at `hls_url`.
    pub fn live(hls_url: impl Into<String>) -> Self {
        Self {
            status: Some(StreamStatus::Live),
            started_at: Some(Utc::now()),
            hls_url: Some(hls_url.into()),
            ..Self::default()
        }
    }

    /// Stream ended now.
    pub fn offline() -> Self {
        Self {
            status: Some(StreamStatus::Offline),
            ended_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Record the inbound publish path alongside the live transition.
    pub fn with_rtmp_path(mut self, path: impl Into<String>) -> Self {
        self.rtmp_url = Some(path.into());
        self
    }

    /// Reset the viewer count (publish ended).
    pub fn with_viewers(mut self, count: i64) -> Self {
        self.viewer_count = Some(count);
        self
    }

    /// Stamp an origin reachability check.
    pub fn checked() -> Self {
        Self {
            last_checked_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Per-stream transcoding settings attached by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    pub stream_id: String,

    /// "low" trades quality for startup latency
    #[serde(default)]
    pub latency_mode: Option<String>,

    #[serde(default)]
    pub max_bitrate_kbps: Option<u32>,

    #[serde(default)]
    pub record_enabled: bool,
}

/// One overlay the transcoding stage composites onto the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub id: String,
    pub stream_id: String,
    pub name: String,
    pub image_url: String,

    /// Corner anchor, e.g. "top-left"
    #[serde(default)]
    pub position: Option<String>,

    #[serde(default)]
    pub enabled: bool,
}

/// Derived host health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
        }
    }
}

/// Append-only host/stream health sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub active_streams: u64,
    pub total_viewers: i64,
    pub status: HealthStatus,
    pub sampled_at: DateTime<Utc>,
}

/// Identity of a deleted source as carried by the change feed.
///
/// Delete payloads may be partial depending on the registry's replica
/// configuration, so both fields are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RemovedSource {
    #[serde(default)]
    pub stream_key: Option<String>,

    #[serde(default)]
    pub stream_name: Option<String>,
}

/// A configuration change pushed by the registry.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A new pulled source was created
    SourceAdded(SourceDescriptor),
    /// A stream row was deleted
    SourceRemoved(RemovedSource),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulled_source() -> SourceDescriptor {
        SourceDescriptor {
            id: "11111111-2222-3333-4444-555555555555".to_string(),
            stream_name: "cam-1".to_string(),
            stream_key: "tok-1".to_string(),
            input_type: IngestKind::Rtsp,
            rtsp_url: Some("rtsp://camera.local:554/stream1".to_string()),
            rtsp_username: None,
            rtsp_password: None,
            auto_restart: true,
            app: None,
        }
    }

    #[test]
    fn test_origin_url_plain() {
        let source = pulled_source();
        let url = source.origin_url().unwrap();

        assert_eq!(url.as_str(), "rtsp://camera.local:554/stream1");
    }

    #[test]
    fn test_origin_url_embeds_and_encodes_credentials() {
        let source = SourceDescriptor {
            rtsp_username: Some("admin".to_string()),
            rtsp_password: Some("p@ss:word".to_string()),
            ..pulled_source()
        };

        let url = source.origin_url().unwrap();
        assert_eq!(url.username(), "admin");
        // Reserved characters are percent-encoded on the wire
        assert!(url.as_str().contains("p%40ss%3Aword@"));
    }

    #[test]
    fn test_origin_url_rejects_wrong_scheme() {
        let source = SourceDescriptor {
            rtsp_url: Some("http://camera.local/stream1".to_string()),
            ..pulled_source()
        };

        assert!(source.origin_url().is_err());
    }

    #[test]
    fn test_origin_url_missing() {
        let source = SourceDescriptor {
            rtsp_url: None,
            ..pulled_source()
        };

        assert!(source.origin_url().is_err());
    }

    #[test]
    fn test_masked_origin_hides_credentials() {
        let source = SourceDescriptor {
            rtsp_username: Some("admin".to_string()),
            rtsp_password: Some("secret".to_string()),
            ..pulled_source()
        };

        let masked = masked_origin(&source.origin_url().unwrap());
        assert!(!masked.contains("secret"));
        assert!(masked.contains("****"));
    }

    #[test]
    fn test_stream_update_serializes_only_set_fields() {
        let update = StreamUpdate::offline().with_viewers(0);
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["status"], "offline");
        assert_eq!(json["viewer_count"], 0);
        assert!(json.get("hls_url").is_none());
        assert!(json.get("started_at").is_none());
    }

    #[test]
    fn test_source_row_decodes_with_defaults() {
        let row = serde_json::json!({
            "id": "abc",
            "stream_name": "cam-2",
            "stream_key": "tok-2",
            "input_type": "rtsp",
            "rtsp_url": "rtsp://10.0.0.2/main"
        });

        let source: SourceDescriptor = serde_json::from_value(row).unwrap();
        assert!(source.is_pulled());
        assert!(!source.auto_restart);
        assert!(source.rtsp_username.is_none());
    }
}
