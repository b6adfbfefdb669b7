//! In-memory registry double for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{IngestError, Result};

use super::client::StreamRegistry;
use super::model::{
    HealthSample, OverlayConfig, SourceDescriptor, StreamSettings, StreamStatus, StreamUpdate,
};

/// Records every write and serves canned rows.
#[derive(Default)]
pub struct MemoryRegistry {
    sources: Mutex<Vec<SourceDescriptor>>,
    updates: Mutex<Vec<(String, StreamUpdate)>>,
    samples: Mutex<Vec<HealthSample>>,
    settings: Mutex<HashMap<String, StreamSettings>>,
    overlays: Mutex<Vec<OverlayConfig>>,
    viewers: Mutex<HashMap<String, (String, i64)>>,
    totals: Mutex<(u64, i64)>,
    fail_writes: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&self, source: SourceDescriptor) {
        self.sources.lock().unwrap().push(source);
    }

    pub fn set_settings(&self, settings: StreamSettings) {
        self.settings
            .lock()
            .unwrap()
            .insert(settings.stream_id.clone(), settings);
    }

    pub fn add_overlay(&self, overlay: OverlayConfig) {
        self.overlays.lock().unwrap().push(overlay);
    }

    pub fn set_viewers(&self, stream_name: &str, stream_id: &str, count: i64) {
        self.viewers
            .lock()
            .unwrap()
            .insert(stream_name.to_string(), (stream_id.to_string(), count));
    }

    pub fn set_totals(&self, active: u64, viewers: i64) {
        *self.totals.lock().unwrap() = (active, viewers);
    }

    /// Make every write fail, like a registry outage.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn updates_for(&self, id: &str) -> Vec<StreamUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(row, _)| row == id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub fn samples(&self) -> Vec<HealthSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn current_viewers(&self, stream_name: &str) -> Option<i64> {
        self.viewers
            .lock()
            .unwrap()
            .get(stream_name)
            .map(|(_, count)| *count)
    }

    /// Block until a write with the given status lands for the row.
    pub async fn wait_for_status(&self, id: &str, status: StreamStatus) -> StreamUpdate {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found = self
                    .updates
                    .lock()
                    .unwrap()
                    .iter()
                    .rev()
                    .find(|(row, update)| row == id && update.status == Some(status))
                    .map(|(_, update)| update.clone());

                if let Some(update) = found {
                    return update;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for registry status")
    }

    /// Block until at least `count` writes have landed for the row.
    pub async fn wait_for_update_count(&self, id: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let seen = self
                    .updates
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(row, _)| row == id)
                    .count();

                if seen >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for registry writes")
    }

    fn write_guard(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IngestError::Io(std::io::Error::other(
                "simulated registry outage",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamRegistry for MemoryRegistry {
    async fn fetch_pulled_sources(&self) -> Result<Vec<SourceDescriptor>> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_pulled())
            .cloned()
            .collect())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SourceDescriptor>> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.stream_key == token)
            .cloned())
    }

    async fn update_stream(&self, id: &str, update: &StreamUpdate) -> Result<()> {
        self.write_guard()?;

        if let Some(count) = update.viewer_count {
            let mut viewers = self.viewers.lock().unwrap();
            if let Some(entry) = viewers.values_mut().find(|(row, _)| row == id) {
                entry.1 = count;
            }
        }

        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), update.clone()));
        Ok(())
    }

    async fn stream_settings(&self, stream_id: &str) -> Result<Option<StreamSettings>> {
        Ok(self.settings.lock().unwrap().get(stream_id).cloned())
    }

    async fn overlays(&self, stream_id: &str) -> Result<Vec<OverlayConfig>> {
        Ok(self
            .overlays
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.stream_id == stream_id && o.enabled)
            .cloned()
            .collect())
    }

    async fn viewer_count(&self, stream_name: &str) -> Result<Option<(String, i64)>> {
        Ok(self.viewers.lock().unwrap().get(stream_name).cloned())
    }

    async fn live_totals(&self) -> Result<(u64, i64)> {
        Ok(*self.totals.lock().unwrap())
    }

    async fn insert_health_sample(&self, sample: &HealthSample) -> Result<()> {
        self.write_guard()?;
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }
}
