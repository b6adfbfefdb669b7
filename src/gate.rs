//! Publish authorization gate
//!
//! Every inbound publish attempt runs the same short state machine:
//! checking, then authorized or rejected. Supervisor-initiated pulls are
//! trusted by their stream name; everything else must present a valid
//! admission token. A rejection is terminal for the attempt — the gate
//! never retries on the connection path.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::pull::ActivePulls;
use crate::registry::{OverlayConfig, SourceDescriptor, StreamRegistry, StreamSettings};

/// Inbound publish attempt payload.
///
/// One explicit shape for the whole admission path: the publish path and
/// the raw connection arguments, decoded exactly once at this boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    /// Publish path, e.g. `/live/cam-1`
    pub path: String,

    /// Raw query-style connection arguments, e.g. `key=abc123`
    #[serde(default)]
    pub query: Option<String>,
}

impl PublishRequest {
    pub fn new(path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            path: path.into(),
            query,
        }
    }

    /// Stream name from the last path segment.
    pub fn stream_name(&self) -> Option<&str> {
        stream_name_from_path(&self.path)
    }

    /// Admission token from the connection arguments.
    ///
    /// Prefers the `key` argument; falls back to the first pair's value
    /// for encoders that send the bare token.
    pub fn token(&self) -> Option<&str> {
        let query = self.query.as_deref()?;

        let mut first = None;
        for pair in query.split('&') {
            let mut kv = pair.splitn(2, '=');
            let (Some(name), Some(value)) = (kv.next(), kv.next()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if name == "key" {
                return Some(value);
            }
            first.get_or_insert(value);
        }

        first
    }
}

/// Last non-empty path segment.
pub(crate) fn stream_name_from_path(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).next_back()
}

/// Lifecycle of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Decision in progress
    Checking,
    /// Attempt admitted
    Authorized,
    /// Attempt refused; terminal
    Rejected,
}

/// Per-attempt state tracked while the gate decides.
#[derive(Debug)]
pub struct PublishAttempt {
    pub phase: GatePhase,
    pub started_at: Instant,
}

impl PublishAttempt {
    pub fn new() -> Self {
        Self {
            phase: GatePhase::Checking,
            started_at: Instant::now(),
        }
    }

    /// Transition to authorized; only valid while checking.
    pub fn authorize(&mut self) {
        if self.phase == GatePhase::Checking {
            self.phase = GatePhase::Authorized;
        }
    }

    /// Transition to rejected; only valid while checking.
    pub fn reject(&mut self) {
        if self.phase == GatePhase::Checking {
            self.phase = GatePhase::Rejected;
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.phase == GatePhase::Authorized
    }
}

impl Default for PublishAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Path did not yield a stream name
    InvalidPath,
    /// No admission token in the connection arguments
    MissingToken,
    /// Token matched no configured source
    UnknownToken,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InvalidPath => write!(f, "invalid publish path"),
            RejectReason::MissingToken => write!(f, "no admission token provided"),
            RejectReason::UnknownToken => write!(f, "unknown admission token"),
        }
    }
}

/// Everything the transcoding stage needs for an admitted publisher.
#[derive(Debug, Clone)]
pub struct PublisherGrant {
    pub source: SourceDescriptor,
    pub settings: Option<StreamSettings>,
    pub overlays: Vec<OverlayConfig>,
    pub playback_url: String,
}

/// Gate decision for one attempt.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    /// Supervisor-originated pull; admitted without credentials
    TrustedPull { stream_name: String },
    /// External publisher validated by admission token
    Publisher(Box<PublisherGrant>),
    /// Terminal refusal
    Rejected(RejectReason),
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        !matches!(self, AccessDecision::Rejected(_))
    }
}

/// Admission gate for the publish surface.
pub struct AuthGate {
    pulls: Arc<ActivePulls>,
    registry: Arc<dyn StreamRegistry>,
    config: Arc<IngestConfig>,
}

impl AuthGate {
    pub fn new(
        pulls: Arc<ActivePulls>,
        registry: Arc<dyn StreamRegistry>,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            pulls,
            registry,
            config,
        }
    }

    /// Decide one publish attempt.
    ///
    /// Runs synchronously on the admission path; connection setup already
    /// tolerates a blocking registry lookup here.
    pub async fn authorize(&self, request: &PublishRequest) -> AccessDecision {
        let mut attempt = PublishAttempt::new();

        let Some(stream_name) = request.stream_name() else {
            attempt.reject();
            info!(path = %request.path, "publish rejected: invalid path");
            return AccessDecision::Rejected(RejectReason::InvalidPath);
        };

        if self.pulls.contains(stream_name).await {
            attempt.authorize();
            info!(stream = %stream_name, "publish authorized: supervisor pull");
            return AccessDecision::TrustedPull {
                stream_name: stream_name.to_string(),
            };
        }

        let Some(token) = request.token() else {
            attempt.reject();
            info!(stream = %stream_name, "publish rejected: no admission token");
            return AccessDecision::Rejected(RejectReason::MissingToken);
        };

        let source = match self.registry.find_by_token(token).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                attempt.reject();
                info!(stream = %stream_name, "publish rejected: unknown admission token");
                return AccessDecision::Rejected(RejectReason::UnknownToken);
            }
            Err(e) => {
                attempt.reject();
                warn!(stream = %stream_name, error = %e, "publish rejected: registry lookup failed");
                return AccessDecision::Rejected(RejectReason::UnknownToken);
            }
        };

        // Enrichment for the transcoding stage is best-effort; a missing
        // settings row never blocks admission.
        let settings = match self.registry.stream_settings(&source.id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(stream = %source.stream_name, error = %e, "settings fetch failed");
                None
            }
        };
        let overlays = match self.registry.overlays(&source.id).await {
            Ok(overlays) => overlays,
            Err(e) => {
                warn!(stream = %source.stream_name, error = %e, "overlay fetch failed");
                Vec::new()
            }
        };

        attempt.authorize();
        info!(stream = %source.stream_name, "publish authorized");

        let playback_url = self.config.hls_url(&source.stream_name);
        AccessDecision::Publisher(Box::new(PublisherGrant {
            source,
            settings,
            overlays,
            playback_url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pull::ActivePull;
    use crate::registry::testing::MemoryRegistry;
    use crate::registry::IngestKind;

    fn source(name: &str, token: &str) -> SourceDescriptor {
        SourceDescriptor {
            id: format!("id-{name}"),
            stream_name: name.to_string(),
            stream_key: token.to_string(),
            input_type: IngestKind::Rtmp,
            rtsp_url: None,
            rtsp_username: None,
            rtsp_password: None,
            auto_restart: false,
            app: None,
        }
    }

    fn gate(registry: Arc<MemoryRegistry>, pulls: Arc<ActivePulls>) -> AuthGate {
        AuthGate::new(pulls, registry, Arc::new(IngestConfig::default()))
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut attempt = PublishAttempt::new();
        assert_eq!(attempt.phase, GatePhase::Checking);

        attempt.authorize();
        assert!(attempt.is_authorized());

        // terminal; a late reject does not flip the decision
        attempt.reject();
        assert_eq!(attempt.phase, GatePhase::Authorized);
    }

    #[test]
    fn test_request_parsing() {
        let request = PublishRequest::new("/live/cam-1", Some("key=tok-1".to_string()));
        assert_eq!(request.stream_name(), Some("cam-1"));
        assert_eq!(request.token(), Some("tok-1"));

        // bare token value from older encoders
        let bare = PublishRequest::new("/live/cam-1", Some("streamkey=tok-2".to_string()));
        assert_eq!(bare.token(), Some("tok-2"));

        let none = PublishRequest::new("/live/cam-1", None);
        assert_eq!(none.token(), None);

        let empty_path = PublishRequest::new("///", None);
        assert_eq!(empty_path.stream_name(), None);
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let gate = gate(Arc::new(MemoryRegistry::new()), Arc::new(ActivePulls::new()));

        let decision = gate.authorize(&PublishRequest::new("", None)).await;
        assert!(matches!(
            decision,
            AccessDecision::Rejected(RejectReason::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn test_active_pull_trusted_without_token() {
        let registry = Arc::new(MemoryRegistry::new());
        let pulls = Arc::new(ActivePulls::new());
        let mut pulled = source("cam-2", "tok-2");
        pulled.input_type = IngestKind::Rtsp;
        pulls.insert(ActivePull::new(&pulled)).await;

        let gate = gate(registry, Arc::clone(&pulls));

        let decision = gate
            .authorize(&PublishRequest::new("/live/cam-2", None))
            .await;
        assert!(matches!(
            decision,
            AccessDecision::TrustedPull { ref stream_name } if stream_name == "cam-2"
        ));
    }

    #[tokio::test]
    async fn test_no_pull_and_no_token_rejected() {
        let gate = gate(Arc::new(MemoryRegistry::new()), Arc::new(ActivePulls::new()));

        let decision = gate
            .authorize(&PublishRequest::new("/live/cam-2", None))
            .await;
        assert!(matches!(
            decision,
            AccessDecision::Rejected(RejectReason::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let gate = gate(Arc::new(MemoryRegistry::new()), Arc::new(ActivePulls::new()));

        let decision = gate
            .authorize(&PublishRequest::new(
                "/live/cam-1",
                Some("key=bogus".to_string()),
            ))
            .await;
        assert!(matches!(
            decision,
            AccessDecision::Rejected(RejectReason::UnknownToken)
        ));
    }

    #[tokio::test]
    async fn test_valid_token_grants_with_enrichment() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.add_source(source("studio", "tok-s"));
        registry.set_settings(StreamSettings {
            stream_id: "id-studio".to_string(),
            latency_mode: Some("low".to_string()),
            max_bitrate_kbps: Some(4500),
            record_enabled: false,
        });
        registry.add_overlay(OverlayConfig {
            id: "ov-1".to_string(),
            stream_id: "id-studio".to_string(),
            name: "logo".to_string(),
            image_url: "https://cdn.example.com/logo.png".to_string(),
            position: Some("top-right".to_string()),
            enabled: true,
        });

        let gate = gate(registry, Arc::new(ActivePulls::new()));

        let decision = gate
            .authorize(&PublishRequest::new(
                "/live/studio",
                Some("key=tok-s".to_string()),
            ))
            .await;

        match decision {
            AccessDecision::Publisher(grant) => {
                assert_eq!(grant.source.stream_name, "studio");
                assert_eq!(grant.settings.unwrap().latency_mode.as_deref(), Some("low"));
                assert_eq!(grant.overlays.len(), 1);
                assert_eq!(
                    grant.playback_url,
                    "http://localhost:8000/live/studio/index.m3u8"
                );
            }
            other => panic!("expected grant, got {other:?}"),
        }
    }
}
