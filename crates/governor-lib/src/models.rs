//! Core data models for the governor

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric labels produced by the sampler
pub mod labels {
    pub const USAGE: &str = "usage";
    pub const IPC_U: &str = "ipc_u";
    pub const IPC_P: &str = "ipc_p";
    pub const MPKI: &str = "mpki";
    pub const BMPKI: &str = "bmpki";
    pub const DAPKI: &str = "dapki";
    pub const IPS: &str = "ips";
    pub const TEMP: &str = "temp";
    pub const POWER: &str = "power";
    pub const FREQ: &str = "freq";
    pub const VOLT: &str = "volt";

    /// Every label a snapshot may carry
    pub const ALL: &[&str] = &[
        USAGE, IPC_U, IPC_P, MPKI, BMPKI, DAPKI, IPS, TEMP, POWER, FREQ, VOLT,
    ];

    pub fn is_known(label: &str) -> bool {
        ALL.contains(&label)
    }
}

/// Metrics observed during one control period
///
/// Built once per tick and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: i64,
    values: BTreeMap<String, f64>,
}

impl MetricSnapshot {
    pub fn new(values: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            values: values.into_iter().collect(),
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.values.get(label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Discretized state: one bucket index per metric, optionally followed by the
/// frequency index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateVector(pub Vec<usize>);

impl StateVector {
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for StateVector {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

/// Index into the ordered action set
pub type Action = usize;

/// One observed step of experience
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: StateVector,
    pub action: Action,
    pub reward: f64,
}
