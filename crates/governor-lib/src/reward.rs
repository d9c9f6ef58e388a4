//! Reward model
//!
//! Scores the period that just ended. The snapshot passed in describes the
//! consequences of the action chosen one tick earlier, so the outcome passed
//! alongside it must be that earlier action's outcome.

use crate::actions::ActionOutcome;
use crate::config::{GovernorConfig, PowerSource, RewardConfig};
use crate::error::{GovernorError, Result};
use crate::models::{labels, MetricSnapshot};
use serde::Serialize;

/// Individual weighted terms, kept apart for logging
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardTerms {
    pub throughput: f64,
    pub power: f64,
    pub thermal: f64,
    pub boundary: f64,
}

impl RewardTerms {
    pub fn total(&self) -> f64 {
        self.throughput - self.power - self.thermal - self.boundary
    }
}

#[derive(Debug, Clone)]
pub struct RewardModel {
    config: RewardConfig,
    ips_max: f64,
    vvf_min: f64,
    vvf_max: f64,
}

impl RewardModel {
    pub fn from_config(config: &GovernorConfig) -> Self {
        let freqs = &config.frequencies;
        let vvfs: Vec<f64> = freqs
            .khz
            .iter()
            .zip(&freqs.volts)
            .map(|(&khz, &v)| vvf(v, khz as f64))
            .collect();
        let vvf_min = vvfs.iter().copied().fold(f64::INFINITY, f64::min);
        let vvf_max = vvfs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ips_max = freqs.max_khz() as f64
            * 1000.0
            * config.reward.ipc_max
            * config.controller.cores.len() as f64;

        Self {
            config: config.reward.clone(),
            ips_max,
            vvf_min,
            vvf_max,
        }
    }

    /// Weighted terms for the period described by `raw`
    pub fn terms(&self, raw: &MetricSnapshot, outcome: &ActionOutcome) -> Result<RewardTerms> {
        let c = &self.config;

        let ips = require(raw, labels::IPS)?.max(0.0);
        let throughput = c.throughput_weight * (ips / self.ips_max);

        let (power_n, power_scale) = match c.power {
            PowerSource::Vvf => {
                let v = vvf(require(raw, labels::VOLT)?, require(raw, labels::FREQ)?);
                (self.normalize_vvf(v), v / self.vvf_max)
            }
            PowerSource::Measured { min, max } => {
                let watts = require(raw, labels::POWER)?;
                let n = ((watts - min) / (max - min)).clamp(0.0, 1.0);
                (n, n)
            }
        };
        let power = c.power_weight * power_n;

        let violation = (require(raw, labels::TEMP)? - c.thermal_limit).max(0.0);
        let mut thermal = c.thermal_weight * violation;
        if c.scale_thermal_by_power {
            thermal *= power_scale;
        }

        let boundary = if outcome.clamped() {
            c.boundary_penalty
        } else {
            0.0
        };

        Ok(RewardTerms {
            throughput,
            power,
            thermal,
            boundary,
        })
    }

    pub fn reward(&self, raw: &MetricSnapshot, outcome: &ActionOutcome) -> Result<f64> {
        Ok(self.terms(raw, outcome)?.total())
    }

    fn normalize_vvf(&self, v: f64) -> f64 {
        let span = self.vvf_max - self.vvf_min;
        if span <= f64::EPSILON {
            return 0.0;
        }
        ((v - self.vvf_min) / span).clamp(0.0, 1.0)
    }
}

/// Dynamic power proxy: V^2 * f
fn vvf(volts: f64, khz: f64) -> f64 {
    volts * volts * khz
}

fn require(raw: &MetricSnapshot, label: &str) -> Result<f64> {
    raw.get(label)
        .ok_or_else(|| GovernorError::Sensing(format!("reward needs a '{}' reading", label)))
}
