//! Supervisor configuration
//!
//! All knobs come from the environment (a `.env` file is honored via
//! `dotenvy` in the binary). Playback and ingest URL shapes are computed
//! here so every component renders them identically.

use std::path::PathBuf;
use std::time::Duration;

/// How a pulled source is republished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutputKind {
    /// Write segmented HLS under the media root
    Hls,
    /// Re-mux to the local RTMP ingest point
    Relay,
}

/// Ingest supervisor configuration options
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Public RTMP host (for publisher-facing URLs)
    pub rtmp_host: String,

    /// RTMP ingest port
    pub rtmp_port: u16,

    /// Whether publisher-facing RTMP URLs use rtmps
    pub rtmp_secure: bool,

    /// Public HTTP host (for playback URLs)
    pub http_host: String,

    /// HTTP playback/hook port
    pub http_port: u16,

    /// Whether playback URLs use https
    pub http_secure: bool,

    /// Application namespace streams publish under
    pub app: String,

    /// Root directory for HLS output
    pub media_root: PathBuf,

    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Stream registry base URL
    pub registry_url: String,

    /// Stream registry service credential
    pub registry_key: String,

    /// Output mode for supervisor-initiated pulls
    pub pull_output: PullOutputKind,

    /// Delay before relaunching a failed pull
    pub restart_backoff: Duration,

    /// Interval between host health samples
    pub health_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rtmp_host: "localhost".to_string(),
            rtmp_port: 1935,
            rtmp_secure: false,
            http_host: "localhost".to_string(),
            http_port: 8000,
            http_secure: false,
            app: "live".to_string(),
            media_root: PathBuf::from("./media"),
            ffmpeg_path: "/usr/bin/ffmpeg".to_string(),
            registry_url: String::new(),
            registry_key: String::new(),
            pull_output: PullOutputKind::Hls,
            restart_backoff: Duration::from_secs(5),
            health_interval: Duration::from_secs(60),
        }
    }
}

impl IngestConfig {
    /// Build a configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults above; malformed numeric
    /// values do too rather than aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            rtmp_host: env_string("RTMP_HOST", &defaults.rtmp_host),
            rtmp_port: env_parse("RTMP_PORT", defaults.rtmp_port),
            rtmp_secure: env_flag("RTMP_SECURE"),
            http_host: env_string("HTTP_HOST", &defaults.http_host),
            http_port: env_parse("HTTP_PORT", defaults.http_port),
            http_secure: env_flag("HTTP_SECURE"),
            app: env_string("STREAM_APP", &defaults.app),
            media_root: PathBuf::from(env_string("MEDIA_ROOT", "./media")),
            ffmpeg_path: env_string("FFMPEG_PATH", &defaults.ffmpeg_path),
            registry_url: env_string("REGISTRY_URL", ""),
            registry_key: env_string("REGISTRY_SERVICE_KEY", ""),
            pull_output: match std::env::var("PULL_OUTPUT").as_deref() {
                Ok("relay") => PullOutputKind::Relay,
                _ => PullOutputKind::Hls,
            },
            restart_backoff: defaults.restart_backoff,
            health_interval: defaults.health_interval,
        }
    }

    /// Set the media root
    pub fn media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = root.into();
        self
    }

    /// Set the ffmpeg binary path
    pub fn ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Set the registry endpoint and credential
    pub fn registry(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self.registry_key = key.into();
        self
    }

    /// HLS output directory for a stream name
    pub fn hls_dir(&self, stream_name: &str) -> PathBuf {
        self.media_root.join(&self.app).join(stream_name)
    }

    /// Public playback URL for a stream name
    ///
    /// Default ports (80 plain, 443 secure) are elided.
    pub fn hls_url(&self, stream_name: &str) -> String {
        let scheme = if self.http_secure { "https" } else { "http" };
        let default_port = if self.http_secure { 443 } else { 80 };
        let port = if self.http_port == default_port {
            String::new()
        } else {
            format!(":{}", self.http_port)
        };
        format!(
            "{}://{}{}/{}/{}/index.m3u8",
            scheme, self.http_host, port, self.app, stream_name
        )
    }

    /// Public RTMP ingest URL shown to publishers
    pub fn public_rtmp_url(&self) -> String {
        let scheme = if self.rtmp_secure { "rtmps" } else { "rtmp" };
        let default_port = if self.rtmp_secure { 443 } else { 1935 };
        let port = if self.rtmp_port == default_port {
            String::new()
        } else {
            format!(":{}", self.rtmp_port)
        };
        format!("{}://{}{}/{}", scheme, self.rtmp_host, port, self.app)
    }

    /// Local RTMP republish target for a relayed pull
    ///
    /// Carries the admission token as a query argument so the gate can
    /// recognize the connection.
    pub fn relay_url(&self, stream_name: &str, token: &str) -> String {
        format!(
            "rtmp://127.0.0.1:{}/{}/{}?key={}",
            self.rtmp_port, self.app, stream_name, token
        )
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "true").unwrap_or(false)
}
