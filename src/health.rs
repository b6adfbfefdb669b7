//! Health sampling
//!
//! On a fixed interval, snapshot host CPU and memory usage together with
//! the registry's live-stream and viewer aggregates, and append one
//! immutable sample. A failed tick is logged; the next tick proceeds on
//! its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::{HealthSample, HealthStatus, StreamRegistry};

/// Warning thresholds: the host is healthy while CPU stays under 80% and
/// memory under 90%.
const CPU_WARN_PERCENT: f32 = 80.0;
const MEMORY_WARN_PERCENT: f32 = 90.0;

/// Derive the sample status from host usage.
fn derive_status(cpu_percent: f32, memory_percent: f32) -> HealthStatus {
    if cpu_percent < CPU_WARN_PERCENT && memory_percent < MEMORY_WARN_PERCENT {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warning
    }
}

/// Periodic host/stream health sampler.
pub struct HealthSampler {
    registry: Arc<dyn StreamRegistry>,
    interval: Duration,
    // Kept across ticks so CPU usage is measured against the previous
    // refresh rather than process start.
    system: Mutex<System>,
}

impl HealthSampler {
    pub fn new(registry: Arc<dyn StreamRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            system: Mutex::new(System::new()),
        }
    }

    /// Take and record one sample.
    pub async fn sample_once(&self) -> Result<HealthSample> {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock().await;
            system.refresh_cpu_usage();
            system.refresh_memory();

            let cpu = system.global_cpu_usage();
            let total = system.total_memory();
            let memory = if total > 0 {
                (system.used_memory() as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            };
            (cpu, memory)
        };

        let (active_streams, total_viewers) = self.registry.live_totals().await?;

        let sample = HealthSample {
            cpu_percent,
            memory_percent,
            active_streams,
            total_viewers,
            status: derive_status(cpu_percent, memory_percent),
            sampled_at: Utc::now(),
        };

        self.registry.insert_health_sample(&sample).await?;
        Ok(sample)
    }

    /// Sample forever on the configured interval.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;
            match self.sample_once().await {
                Ok(sample) => {
                    debug!(
                        status = %sample.status,
                        cpu = sample.cpu_percent,
                        memory = sample.memory_percent,
                        streams = sample.active_streams,
                        viewers = sample.total_viewers,
                        "health sample recorded"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "health sample failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::MemoryRegistry;

    #[test]
    fn test_derive_status_thresholds() {
        assert_eq!(derive_status(10.0, 20.0), HealthStatus::Healthy);
        assert_eq!(derive_status(79.9, 89.9), HealthStatus::Healthy);
        // either limit alone tips the sample to warning
        assert_eq!(derive_status(80.0, 20.0), HealthStatus::Warning);
        assert_eq!(derive_status(10.0, 90.0), HealthStatus::Warning);
        assert_eq!(derive_status(95.0, 95.0), HealthStatus::Warning);
    }

    #[tokio::test]
    async fn test_sample_once_records_registry_totals() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_totals(4, 117);

        let sampler = HealthSampler::new(registry.clone(), Duration::from_secs(60));
        let sample = sampler.sample_once().await.unwrap();

        assert_eq!(sample.active_streams, 4);
        assert_eq!(sample.total_viewers, 117);
        assert!(sample.cpu_percent >= 0.0);

        let recorded = registry.samples();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].active_streams, 4);
    }

    #[tokio::test]
    async fn test_failed_sample_does_not_panic() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_writes(true);

        let sampler = HealthSampler::new(registry.clone(), Duration::from_secs(60));
        assert!(sampler.sample_once().await.is_err());
        assert!(registry.samples().is_empty());
    }
}
