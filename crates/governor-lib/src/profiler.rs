//! State-space profiling
//!
//! Samples the cluster without acting on it and records the observed range
//! of every metric plus a histogram per state axis. The result is what the
//! metric bounds in the configuration should be tuned from.

use crate::config::GovernorConfig;
use crate::controller::deadline_missed;
use crate::discretizer::StateEncoder;
use crate::error::{PersistenceError, Result};
use crate::models::MetricSnapshot;
use crate::persistence::write_atomic;
use crate::sensing::{Platform, Sampler};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Samples between profile checkpoints
const CHECKPOINT_EVERY: u64 = 1000;

/// Observed ranges and bucket occupancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProfile {
    pub samples: u64,
    pub min: BTreeMap<String, f64>,
    pub max: BTreeMap<String, f64>,
    /// Axis names in state order
    pub axes: Vec<String>,
    /// One histogram per state axis
    pub bucket_counts: Vec<Vec<u64>>,
}

impl StateProfile {
    pub fn new(axes: Vec<String>, dims: &[usize]) -> Self {
        Self {
            samples: 0,
            min: BTreeMap::new(),
            max: BTreeMap::new(),
            axes,
            bucket_counts: dims.iter().map(|&d| vec![0; d]).collect(),
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        let mut axes: Vec<String> = config.metrics.iter().map(|m| m.label.clone()).collect();
        if config.frequencies.in_state {
            axes.push(crate::models::labels::FREQ.to_string());
        }
        Self::new(axes, &config.state_dims())
    }

    /// True when a saved profile describes the same state axes
    pub fn compatible_with(&self, other: &StateProfile) -> bool {
        self.axes == other.axes
            && self
                .bucket_counts
                .iter()
                .map(Vec::len)
                .eq(other.bucket_counts.iter().map(Vec::len))
    }

    pub fn record(&mut self, snapshot: &MetricSnapshot, buckets: &[usize]) {
        self.samples += 1;
        for (label, value) in snapshot.iter() {
            self.min
                .entry(label.to_string())
                .and_modify(|m| *m = m.min(value))
                .or_insert(value);
            self.max
                .entry(label.to_string())
                .and_modify(|m| *m = m.max(value))
                .or_insert(value);
        }
        for (counts, &b) in self.bucket_counts.iter_mut().zip(buckets) {
            if let Some(slot) = counts.get_mut(b) {
                *slot += 1;
            }
        }
    }
}

pub struct Profiler {
    sampler: Sampler,
    encoder: StateEncoder,
    period: std::time::Duration,
    path: PathBuf,
    profile: StateProfile,
    max_samples: Option<u64>,
}

impl Profiler {
    /// Resume from a compatible saved profile when there is one
    pub fn new(platform: Arc<dyn Platform>, config: &GovernorConfig) -> Result<Self> {
        config.validate()?;
        let path = config
            .controller
            .table_dir
            .join(format!("profile_{}ms.json", config.controller.period_ms));

        let fresh = StateProfile::from_config(config);
        let profile = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<StateProfile>(&data) {
                Ok(saved) if saved.compatible_with(&fresh) => {
                    info!(path = %path.display(), samples = saved.samples, "Resuming saved profile");
                    saved
                }
                Ok(_) => {
                    warn!(path = %path.display(), "Saved profile has different axes, starting over");
                    fresh
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Saved profile unreadable, starting over");
                    fresh
                }
            },
            Err(_) => fresh,
        };

        Ok(Self {
            sampler: Sampler::from_config(platform, config),
            encoder: StateEncoder::from_config(config),
            period: config.period(),
            path,
            profile,
            max_samples: None,
        })
    }

    pub fn max_samples(mut self, samples: u64) -> Self {
        self.max_samples = Some(samples);
        self
    }

    pub fn profile(&self) -> &StateProfile {
        &self.profile
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Take and record one sample; non-fatal sensing errors are skipped
    pub async fn sample_once(&mut self) -> Result<bool> {
        let observed = async {
            let snapshot = self.sampler.sample().await?;
            let state = self.encoder.encode(&snapshot)?;
            Ok::<_, crate::error::GovernorError>((snapshot, state))
        }
        .await;

        match observed {
            Ok((snapshot, state)) => {
                self.profile.record(&snapshot, state.as_slice());
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Profile sample skipped");
                Ok(false)
            }
        }
    }

    pub fn save(&self) -> std::result::Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(&self.profile)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        write_atomic(&self.path, &data)
    }

    /// Sample until shutdown or `max_samples`, checkpointing periodically
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<StateProfile> {
        info!(period_ms = self.period.as_millis() as u64, "Starting state-space profiling");
        let mut taken = 0u64;

        loop {
            if self.max_samples.map_or(false, |max| taken >= max) {
                break;
            }

            let start = Instant::now();
            self.sample_once().await?;
            taken += 1;

            if self.profile.samples > 0 && self.profile.samples % CHECKPOINT_EVERY == 0 {
                match self.save() {
                    Ok(()) => info!(samples = self.profile.samples, "Profile checkpointed"),
                    Err(e) => warn!(error = %e, "Failed to checkpoint profile"),
                }
            }

            let elapsed = start.elapsed();
            if deadline_missed(elapsed, self.period) {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    period_ms = self.period.as_millis() as u64,
                    "Profile sample overran the period"
                );
                continue;
            }

            tokio::select! {
                _ = sleep(self.period - elapsed) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.save()?;
        info!(path = %self.path.display(), samples = self.profile.samples, "Profile saved");
        Ok(self.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::labels;
    use crate::test_support::MockPlatform;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> GovernorConfig {
        let mut config = GovernorConfig::default();
        config.controller.period_ms = 1;
        config.controller.table_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_record_tracks_ranges_and_buckets() {
        let mut profile = StateProfile::new(vec!["temp".into()], &[3]);
        let snap = |t: f64| MetricSnapshot::new(vec![(labels::TEMP.to_string(), t)]);

        profile.record(&snap(48.0), &[1]);
        profile.record(&snap(52.0), &[2]);
        profile.record(&snap(45.0), &[1]);

        assert_eq!(profile.samples, 3);
        assert_eq!(profile.min[labels::TEMP], 45.0);
        assert_eq!(profile.max[labels::TEMP], 52.0);
        assert_eq!(profile.bucket_counts, vec![vec![0, 2, 1]]);
    }

    #[tokio::test]
    async fn test_profile_never_actuates() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(600_000));
        let profiler = Profiler::new(platform.clone(), &config)
            .unwrap()
            .max_samples(5);

        let (_tx, rx) = broadcast::channel(1);
        let profile = profiler.run(rx).await.unwrap();

        assert_eq!(profile.samples, 5);
        assert!(platform.writes().is_empty());
        // frequency axis is last; 600 MHz is index 2
        assert_eq!(profile.bucket_counts[3][2], 5);
        assert_eq!(profile.min[labels::FREQ], 600_000.0);
    }

    #[tokio::test]
    async fn test_profile_resumes_from_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(600_000));

        let (_tx, rx) = broadcast::channel(1);
        Profiler::new(platform.clone(), &config)
            .unwrap()
            .max_samples(3)
            .run(rx)
            .await
            .unwrap();

        let (_tx, rx) = broadcast::channel(1);
        let resumed = Profiler::new(platform, &config)
            .unwrap()
            .max_samples(2)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(resumed.samples, 5);
    }

    #[tokio::test]
    async fn test_sensing_failures_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(600_000));
        platform.fail_counters(true);

        let mut profiler = Profiler::new(platform, &config).unwrap();
        assert!(!profiler.sample_once().await.unwrap());
        assert_eq!(profiler.profile().samples, 0);
    }
}
