//! Discretization of scaled readings into a bounded integer lattice
//!
//! Coordinates are floored and clamped into `[0, buckets - 1]`. Readings at
//! or above the configured maximum alias into the top bucket. The frequency
//! axis is an exact lookup in the configured frequency list.

use crate::config::{FrequencyConfig, GovernorConfig};
use crate::error::{GovernorError, Result};
use crate::models::{labels, MetricSnapshot, StateVector};
use crate::scaling::StateScaler;

#[derive(Debug, Clone)]
pub struct Discretizer {
    buckets: Vec<usize>,
    frequencies: Option<Vec<u32>>,
}

impl Discretizer {
    pub fn new(buckets: Vec<usize>, frequencies: Option<Vec<u32>>) -> Self {
        Self {
            buckets,
            frequencies,
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        let buckets = config.metrics.iter().map(|m| m.buckets).collect();
        let frequencies = config
            .frequencies
            .in_state
            .then(|| config.frequencies.khz.clone());
        Self::new(buckets, frequencies)
    }

    /// Bucket scaled coordinates, appending the frequency index when the
    /// frequency is part of the state
    pub fn bucket(&self, scaled: &[f64], raw_frequency: Option<f64>) -> Result<StateVector> {
        if scaled.len() != self.buckets.len() {
            return Err(GovernorError::Invariant(format!(
                "expected {} scaled coordinates, got {}",
                self.buckets.len(),
                scaled.len()
            )));
        }

        let mut state: Vec<usize> = scaled
            .iter()
            .zip(&self.buckets)
            .map(|(&x, &n)| clamp_bucket(x, n))
            .collect();

        if let Some(freqs) = &self.frequencies {
            let raw = raw_frequency.ok_or_else(|| {
                GovernorError::Sensing("frequency reading required for the state".to_string())
            })?;
            state.push(frequency_bucket(freqs, raw)?);
        }

        Ok(StateVector(state))
    }

    /// Size of each state axis
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = self.buckets.clone();
        if let Some(freqs) = &self.frequencies {
            dims.push(freqs.len());
        }
        dims
    }

    /// Number of distinct states
    pub fn state_count(&self) -> usize {
        self.dims().iter().product()
    }
}

/// Floor and saturate one coordinate
fn clamp_bucket(x: f64, buckets: usize) -> usize {
    let top = buckets.saturating_sub(1);
    if x <= 0.0 {
        0
    } else {
        (x.floor() as usize).min(top)
    }
}

/// Exact-match lookup of a frequency in kHz
fn frequency_bucket(freqs: &[u32], raw_khz: f64) -> Result<usize> {
    let khz = raw_khz.round() as u32;
    freqs
        .iter()
        .position(|&f| f == khz)
        .ok_or(GovernorError::UnknownFrequency { khz })
}

/// Scaler and discretizer composed into the snapshot-to-state step
#[derive(Debug, Clone)]
pub struct StateEncoder {
    scaler: StateScaler,
    discretizer: Discretizer,
}

impl StateEncoder {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            scaler: StateScaler::new(&config.metrics),
            discretizer: Discretizer::from_config(config),
        }
    }

    pub fn encode(&self, snapshot: &MetricSnapshot) -> Result<StateVector> {
        let scaled = self.scaler.scale(snapshot)?;
        self.discretizer.bucket(&scaled, snapshot.get(labels::FREQ))
    }

    pub fn dims(&self) -> Vec<usize> {
        self.discretizer.dims()
    }
}

/// Index of the frequency the cluster is currently running at
pub fn current_frequency_index(freqs: &FrequencyConfig, khz: u32) -> Result<usize> {
    freqs
        .index_of(khz)
        .ok_or(GovernorError::UnknownFrequency { khz })
}
