//! sysfs-backed platform
//!
//! Paths:
//! - `{counters_root}/cpu{n}/{counter}` per-period counter values
//! - `{cpu_root}/cpu{n}/cpufreq/scaling_cur_freq` and `scaling_setspeed`
//! - `{cpu_root}/cpu{n}/cpufreq/scaling_governor`
//! - `{thermal_root}/thermal_zone{i}/temp` in millidegrees

use super::Platform;
use crate::config::PlatformConfig;
use crate::error::{GovernorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info};

pub struct SysfsPlatform {
    counters_root: PathBuf,
    cpu_root: PathBuf,
    thermal_root: PathBuf,
    thermal_zones: usize,
    power_sensor: Option<PathBuf>,
    /// Governor in place before `prepare`, per cluster
    previous_governors: Mutex<HashMap<usize, String>>,
}

impl SysfsPlatform {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            counters_root: config.counters_root.clone(),
            cpu_root: config.cpu_root.clone(),
            thermal_root: config.thermal_root.clone(),
            thermal_zones: config.thermal_zones,
            power_sensor: config.power_sensor.clone(),
            previous_governors: Mutex::new(HashMap::new()),
        }
    }

    fn cpufreq_path(&self, cpu: usize, file: &str) -> PathBuf {
        self.cpu_root
            .join(format!("cpu{}", cpu))
            .join("cpufreq")
            .join(file)
    }

    /// Parse a single numeric value from a sysfs file
    pub fn parse_value(content: &str) -> Option<f64> {
        content.split_whitespace().next()?.parse().ok()
    }

    async fn read_value(path: &Path) -> Result<f64> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| GovernorError::Sensing(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse_value(&content).ok_or_else(|| {
            GovernorError::Sensing(format!(
                "{} does not hold a number: {:?}",
                path.display(),
                content.trim()
            ))
        })
    }

    async fn write_value(path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).await.map_err(|e| {
            GovernorError::Actuation(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl Platform for SysfsPlatform {
    async fn prepare(&self, cluster: usize) -> Result<()> {
        let path = self.cpufreq_path(cluster, "scaling_governor");
        let previous = fs::read_to_string(&path)
            .await
            .map_err(|e| GovernorError::Config(format!("cannot read {}: {}", path.display(), e)))?
            .trim()
            .to_string();

        if previous != "userspace" {
            fs::write(&path, "userspace").await.map_err(|e| {
                GovernorError::Config(format!(
                    "cannot switch cluster {} to the userspace governor: {}",
                    cluster, e
                ))
            })?;
        }

        if let Ok(mut governors) = self.previous_governors.lock() {
            governors.insert(cluster, previous.clone());
        }
        info!(cluster, previous_governor = %previous, "Cluster switched to userspace governor");
        Ok(())
    }

    async fn release(&self, cluster: usize) -> Result<()> {
        let previous = self
            .previous_governors
            .lock()
            .ok()
            .and_then(|mut g| g.remove(&cluster));
        if let Some(previous) = previous {
            Self::write_value(&self.cpufreq_path(cluster, "scaling_governor"), &previous).await?;
            info!(cluster, governor = %previous, "Restored cluster governor");
        }
        Ok(())
    }

    async fn read_counter(&self, core: usize, name: &str) -> Result<f64> {
        let path = self.counters_root.join(format!("cpu{}", core)).join(name);
        Self::read_value(&path).await
    }

    async fn read_temperatures(&self) -> Result<Vec<f64>> {
        let mut temps = Vec::with_capacity(self.thermal_zones);
        for zone in 0..self.thermal_zones {
            let path = self
                .thermal_root
                .join(format!("thermal_zone{}", zone))
                .join("temp");
            temps.push(Self::read_value(&path).await? / 1000.0);
        }
        Ok(temps)
    }

    async fn read_power(&self) -> Result<f64> {
        match &self.power_sensor {
            Some(path) => Self::read_value(path).await,
            None => Ok(0.0),
        }
    }

    async fn get_frequency(&self, cluster: usize) -> Result<u32> {
        let khz = Self::read_value(&self.cpufreq_path(cluster, "scaling_cur_freq")).await?;
        Ok(khz.round() as u32)
    }

    async fn set_frequency(&self, cluster: usize, khz: u32) -> Result<()> {
        let path = self.cpufreq_path(cluster, "scaling_setspeed");
        Self::write_value(&path, &khz.to_string()).await?;
        debug!(cluster, khz, "Frequency requested");
        Ok(())
    }
}
