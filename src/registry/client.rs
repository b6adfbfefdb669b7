//! Stream registry REST client
//!
//! The registry speaks a PostgREST-style interface: row filters as query
//! parameters, partial updates via PATCH, service credential in both the
//! `apikey` header and a bearer token. Components depend on the
//! `StreamRegistry` trait so tests can substitute an in-memory double.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::IngestConfig;
use crate::error::Result;

use super::model::{
    HealthSample, OverlayConfig, SourceDescriptor, StreamSettings, StreamUpdate,
};

/// Operations the supervisor needs from the stream registry.
///
/// The registry is a write-mostly projection of supervisor state; nothing
/// here is consulted to decide whether a pull is running.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    /// All sources flagged as externally pulled.
    async fn fetch_pulled_sources(&self) -> Result<Vec<SourceDescriptor>>;

    /// Source lookup by admission token (gate path).
    async fn find_by_token(&self, token: &str) -> Result<Option<SourceDescriptor>>;

    /// Apply a partial update to a stream row.
    async fn update_stream(&self, id: &str, update: &StreamUpdate) -> Result<()>;

    /// Per-stream transcoding settings, if configured.
    async fn stream_settings(&self, stream_id: &str) -> Result<Option<StreamSettings>>;

    /// Enabled overlays for a stream.
    async fn overlays(&self, stream_id: &str) -> Result<Vec<OverlayConfig>>;

    /// Current viewer count for a stream name, with the row id for the
    /// follow-up write.
    async fn viewer_count(&self, stream_name: &str) -> Result<Option<(String, i64)>>;

    /// Live stream count and summed viewer count.
    async fn live_totals(&self) -> Result<(u64, i64)>;

    /// Append one health sample.
    async fn insert_health_sample(&self, sample: &HealthSample) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ViewerRow {
    id: String,
    #[serde(default)]
    viewer_count: Option<i64>,
}

/// REST-backed registry client.
pub struct RestRegistry {
    http: reqwest::Client,
    base: String,
    key: String,
}

impl RestRegistry {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base: config.registry_url.trim_end_matches('/').to_string(),
            key: config.registry_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base, table)
    }

    async fn rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let rows = self
            .http
            .get(self.table_url(table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(rows)
    }
}

#[async_trait]
impl StreamRegistry for RestRegistry {
    async fn fetch_pulled_sources(&self) -> Result<Vec<SourceDescriptor>> {
        self.rows("streams", &[("select", "*"), ("input_type", "eq.rtsp")])
            .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SourceDescriptor>> {
        let filter = format!("eq.{token}");
        let mut rows: Vec<SourceDescriptor> = self
            .rows(
                "streams",
                &[
                    ("select", "*"),
                    ("stream_key", filter.as_str()),
                    ("limit", "1"),
                ],
            )
            .await?;

        Ok(rows.pop())
    }

    async fn update_stream(&self, id: &str, update: &StreamUpdate) -> Result<()> {
        let filter = format!("eq.{id}");
        self.http
            .patch(self.table_url("streams"))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "return=minimal")
            .query(&[("id", filter.as_str())])
            .json(update)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn stream_settings(&self, stream_id: &str) -> Result<Option<StreamSettings>> {
        let filter = format!("eq.{stream_id}");
        let mut rows: Vec<StreamSettings> = self
            .rows(
                "stream_settings",
                &[
                    ("select", "*"),
                    ("stream_id", filter.as_str()),
                    ("limit", "1"),
                ],
            )
            .await?;

        Ok(rows.pop())
    }

    async fn overlays(&self, stream_id: &str) -> Result<Vec<OverlayConfig>> {
        let filter = format!("eq.{stream_id}");
        self.rows(
            "overlays",
            &[
                ("select", "*"),
                ("stream_id", filter.as_str()),
                ("enabled", "eq.true"),
            ],
        )
        .await
    }

    async fn viewer_count(&self, stream_name: &str) -> Result<Option<(String, i64)>> {
        let filter = format!("eq.{stream_name}");
        let mut rows: Vec<ViewerRow> = self
            .rows(
                "streams",
                &[
                    ("select", "id,viewer_count"),
                    ("stream_name", filter.as_str()),
                    ("limit", "1"),
                ],
            )
            .await?;

        Ok(rows
            .pop()
            .map(|row| (row.id, row.viewer_count.unwrap_or(0))))
    }

    async fn live_totals(&self) -> Result<(u64, i64)> {
        let rows: Vec<ViewerRow> = self
            .rows(
                "streams",
                &[("select", "id,viewer_count"), ("status", "eq.live")],
            )
            .await?;

        let viewers = rows.iter().map(|r| r.viewer_count.unwrap_or(0)).sum();
        Ok((rows.len() as u64, viewers))
    }

    async fn insert_health_sample(&self, sample: &HealthSample) -> Result<()> {
        self.http
            .post(self.table_url("health_samples"))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "return=minimal")
            .json(sample)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
