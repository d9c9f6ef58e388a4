//! Governor configuration
//!
//! All knobs are fixed before the controller starts and immutable for the
//! run. Defaults reproduce the big-cluster setup the governor was tuned on:
//! a 50 ms period, `ipc_p`/`mpki`/`temp` state, ten frequencies in 200 MHz
//! steps and a 50 C thermal limit.

use crate::error::{GovernorError, Result};
use crate::models::labels;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Complete governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    /// State metrics in state-vector order
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricBounds>,

    #[serde(default)]
    pub frequencies: FrequencyConfig,

    #[serde(default)]
    pub actions: ActionConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub exploration: ExplorationConfig,

    #[serde(default)]
    pub reward: RewardConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            metrics: default_metrics(),
            frequencies: FrequencyConfig::default(),
            actions: ActionConfig::default(),
            learning: LearningConfig::default(),
            exploration: ExplorationConfig::default(),
            reward: RewardConfig::default(),
            platform: PlatformConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Control period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Lowest-numbered core of the controlled cluster
    #[serde(default = "default_cluster")]
    pub cluster: usize,

    /// Cores whose counters feed the state
    #[serde(default = "default_cores")]
    pub cores: Vec<usize>,

    /// Indices into the platform temperature list for the monitored cores
    #[serde(default = "default_temperature_sensors")]
    pub temperature_sensors: Vec<usize>,

    /// Upper bound on table cells (states times actions)
    #[serde(default = "default_max_state_space")]
    pub max_state_space: usize,

    /// Ticks between checkpoints in train mode (0 disables)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_ticks: u64,

    /// Save the table on shutdown without asking
    #[serde(default = "default_true")]
    pub always_persist: bool,

    /// Directory holding saved tables and profiles
    #[serde(default = "default_table_dir")]
    pub table_dir: PathBuf,

    /// Seed for the exploration RNG; entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            cluster: default_cluster(),
            cores: default_cores(),
            temperature_sensors: default_temperature_sensors(),
            max_state_space: default_max_state_space(),
            checkpoint_interval_ticks: default_checkpoint_interval(),
            always_persist: true,
            table_dir: default_table_dir(),
            seed: None,
        }
    }
}

/// Scaling bounds for one state metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub buckets: usize,
    #[serde(default)]
    pub log_scale: bool,
}

impl MetricBounds {
    pub fn linear(label: &str, min: f64, max: f64, buckets: usize) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
            buckets,
            log_scale: false,
        }
    }

    pub fn logarithmic(label: &str, min: f64, max: f64, buckets: usize) -> Self {
        Self {
            log_scale: true,
            ..Self::linear(label, min, max, buckets)
        }
    }
}

/// Ordered operating points of the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyConfig {
    /// Frequencies in kHz, strictly ascending
    #[serde(default = "default_frequencies")]
    pub khz: Vec<u32>,

    /// Supply voltage at each frequency, in volts
    #[serde(default = "default_voltages")]
    pub volts: Vec<f64>,

    /// Append the current frequency index to the state
    #[serde(default = "default_true")]
    pub in_state: bool,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            khz: default_frequencies(),
            volts: default_voltages(),
            in_state: true,
        }
    }
}

impl FrequencyConfig {
    pub fn index_of(&self, khz: u32) -> Option<usize> {
        self.khz.iter().position(|&f| f == khz)
    }

    pub fn max_khz(&self) -> u32 {
        self.khz.last().copied().unwrap_or(0)
    }
}

/// Shape of the action set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    /// One action per configured frequency
    Absolute,
    /// `steps` relative moves centred on "stay"
    Relative { steps: usize },
}

impl Default for ActionConfig {
    fn default() -> Self {
        ActionConfig::Absolute
    }
}

/// Which value-update rule drives learning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    OneStep,
    LambdaReturn,
    NeighborhoodPenalty,
}

/// Learning-rule parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_strategy")]
    pub strategy: UpdateStrategy,

    /// Discount factor, in [0, 1)
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Constant step size, in (0, 1]
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Trace decay for the lambda-return rule
    #[serde(default = "default_lambda")]
    pub lambda: f64,

    /// Transition history length for the lambda-return rule
    #[serde(default = "default_history")]
    pub history: usize,

    /// State axes swept by the neighborhood-penalty rule
    #[serde(default = "default_swept_axes")]
    pub neighborhood_axes: Vec<String>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            gamma: default_gamma(),
            alpha: default_alpha(),
            lambda: default_lambda(),
            history: default_history(),
            neighborhood_axes: default_swept_axes(),
        }
    }
}

/// Exploration schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExplorationConfig {
    Fixed { epsilon: f64 },
    /// epsilon = n0 / (n0 + visits(state))
    Annealed { n0: f64 },
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        ExplorationConfig::Fixed { epsilon: 0.20 }
    }
}

/// Source of the power term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PowerSource {
    /// V^2 * f proxy from the voltage table
    Vvf,
    /// Measured watts normalized over [min, max]
    Measured { min: f64, max: f64 },
}

impl Default for PowerSource {
    fn default() -> Self {
        PowerSource::Vvf
    }
}

/// Reward weights and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_throughput_weight")]
    pub throughput_weight: f64,

    #[serde(default = "default_power_weight")]
    pub power_weight: f64,

    /// RHO: penalty per degree above the limit
    #[serde(default = "default_thermal_weight")]
    pub thermal_weight: f64,

    /// Celsius
    #[serde(default = "default_thermal_limit")]
    pub thermal_limit: f64,

    /// Multiply the thermal penalty by vvf / vvf_max
    #[serde(default = "default_true")]
    pub scale_thermal_by_power: bool,

    /// Subtracted when a relative action had to be clamped
    #[serde(default = "default_boundary_penalty")]
    pub boundary_penalty: f64,

    /// Per-core IPC ceiling used to normalize throughput
    #[serde(default = "default_ipc_max")]
    pub ipc_max: f64,

    #[serde(default)]
    pub power: PowerSource,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            throughput_weight: default_throughput_weight(),
            power_weight: default_power_weight(),
            thermal_weight: default_thermal_weight(),
            thermal_limit: default_thermal_limit(),
            scale_thermal_by_power: true,
            boundary_penalty: default_boundary_penalty(),
            ipc_max: default_ipc_max(),
            power: PowerSource::default(),
        }
    }
}

/// Locations of the kernel interfaces read by the sysfs platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_counters_root")]
    pub counters_root: PathBuf,

    #[serde(default = "default_cpu_root")]
    pub cpu_root: PathBuf,

    #[serde(default = "default_thermal_root")]
    pub thermal_root: PathBuf,

    /// Number of thermal zones to read
    #[serde(default = "default_thermal_zones")]
    pub thermal_zones: usize,

    /// File reporting cluster power in watts, if the board has one
    #[serde(default)]
    pub power_sensor: Option<PathBuf>,

    #[serde(default)]
    pub counters: CounterNames,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            counters_root: default_counters_root(),
            cpu_root: default_cpu_root(),
            thermal_root: default_thermal_root(),
            thermal_zones: default_thermal_zones(),
            power_sensor: None,
            counters: CounterNames::default(),
        }
    }
}

/// Names of the per-core counter attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterNames {
    pub cycles: String,
    pub instructions: String,
    pub l2_refills: String,
    pub branch_misses: String,
    pub memory_accesses: String,
}

impl Default for CounterNames {
    fn default() -> Self {
        Self {
            cycles: "cycles".to_string(),
            instructions: "instructions_retired".to_string(),
            l2_refills: "l2_data_refills".to_string(),
            branch_misses: "branch_mispredictions".to_string(),
            memory_accesses: "data_memory_accesses".to_string(),
        }
    }
}

/// Health and metrics endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 0 disables the endpoint
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_period_ms() -> u64 {
    50
}

fn default_cluster() -> usize {
    4
}

fn default_cores() -> Vec<usize> {
    vec![4]
}

fn default_temperature_sensors() -> Vec<usize> {
    vec![0]
}

fn default_max_state_space() -> usize {
    1_000_000
}

fn default_checkpoint_interval() -> u64 {
    1200
}

fn default_table_dir() -> PathBuf {
    PathBuf::from("/var/lib/rl-governor")
}

fn default_metrics() -> Vec<MetricBounds> {
    vec![
        MetricBounds::linear(labels::IPC_P, 0.0, 3.0, 10),
        MetricBounds::linear(labels::MPKI, 0.0, 4.0, 5),
        MetricBounds::linear(labels::TEMP, 44.0, 56.0, 6),
    ]
}

fn default_frequencies() -> Vec<u32> {
    (0..10).map(|i| 200_000 + i * 200_000).collect()
}

fn default_voltages() -> Vec<f64> {
    vec![0.9, 0.9, 0.9, 0.9, 0.9375, 0.9875, 1.0375, 1.1, 1.175, 1.2875]
}

fn default_strategy() -> UpdateStrategy {
    UpdateStrategy::OneStep
}

fn default_gamma() -> f64 {
    0.90
}

fn default_alpha() -> f64 {
    0.1
}

fn default_lambda() -> f64 {
    0.6
}

fn default_history() -> usize {
    8
}

fn default_swept_axes() -> Vec<String> {
    vec![
        labels::IPC_P.to_string(),
        labels::TEMP.to_string(),
        labels::FREQ.to_string(),
    ]
}

fn default_throughput_weight() -> f64 {
    1.0
}

fn default_power_weight() -> f64 {
    0.001
}

fn default_thermal_weight() -> f64 {
    5.0
}

fn default_thermal_limit() -> f64 {
    50.0
}

fn default_boundary_penalty() -> f64 {
    5000.0
}

fn default_ipc_max() -> f64 {
    4.0
}

fn default_counters_root() -> PathBuf {
    PathBuf::from("/sys/kernel/performance_counters")
}

fn default_cpu_root() -> PathBuf {
    PathBuf::from("/sys/devices/system/cpu")
}

fn default_thermal_root() -> PathBuf {
    PathBuf::from("/sys/devices/virtual/thermal")
}

fn default_thermal_zones() -> usize {
    4
}

fn default_api_port() -> u16 {
    9100
}

impl GovernorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.controller.period_ms)
    }

    pub fn period_secs(&self) -> f64 {
        self.controller.period_ms as f64 / 1000.0
    }

    /// Number of discrete actions
    pub fn action_count(&self) -> usize {
        match self.actions {
            ActionConfig::Absolute => self.frequencies.khz.len(),
            ActionConfig::Relative { steps } => steps,
        }
    }

    /// Size of each state axis, frequency last when it is part of the state
    pub fn state_dims(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self.metrics.iter().map(|m| m.buckets).collect();
        if self.frequencies.in_state {
            dims.push(self.frequencies.khz.len());
        }
        dims
    }

    /// Position of a named axis in the state vector
    pub fn axis_of(&self, label: &str) -> Option<usize> {
        if label == labels::FREQ {
            return self.frequencies.in_state.then_some(self.metrics.len());
        }
        self.metrics.iter().position(|m| m.label == label)
    }

    /// Total table cells, or None on overflow
    pub fn table_cells(&self) -> Option<usize> {
        self.state_dims()
            .iter()
            .try_fold(self.action_count(), |acc, &d| acc.checked_mul(d))
    }

    /// Check every invariant the controller relies on
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if c.period_ms == 0 {
            return Err(config_err("controller.period_ms must be positive"));
        }
        if c.cores.is_empty() {
            return Err(config_err("controller.cores must not be empty"));
        }
        if c.temperature_sensors.is_empty() {
            return Err(config_err("controller.temperature_sensors must not be empty"));
        }

        self.validate_metrics()?;
        self.validate_frequencies()?;
        self.validate_learning()?;

        match self.actions {
            ActionConfig::Absolute => {}
            ActionConfig::Relative { steps } if steps >= 1 => {}
            ActionConfig::Relative { .. } => {
                return Err(config_err("actions.steps must be at least 1"));
            }
        }

        match self.exploration {
            ExplorationConfig::Fixed { epsilon } if (0.0..=1.0).contains(&epsilon) => {}
            ExplorationConfig::Fixed { epsilon } => {
                return Err(config_err(format!("epsilon {} outside [0, 1]", epsilon)));
            }
            ExplorationConfig::Annealed { n0 } if n0 > 0.0 => {}
            ExplorationConfig::Annealed { n0 } => {
                return Err(config_err(format!("n0 {} must be positive", n0)));
            }
        }

        let r = &self.reward;
        if r.ipc_max <= 0.0 {
            return Err(config_err("reward.ipc_max must be positive"));
        }
        if let PowerSource::Measured { min, max } = r.power {
            if min >= max {
                return Err(config_err("reward.power bounds require min < max"));
            }
        }

        let cells = self
            .table_cells()
            .ok_or(GovernorError::StateSpaceTooLarge {
                cells: usize::MAX,
                limit: c.max_state_space,
            })?;
        if cells > c.max_state_space {
            return Err(GovernorError::StateSpaceTooLarge {
                cells,
                limit: c.max_state_space,
            });
        }

        Ok(())
    }

    fn validate_metrics(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(config_err("at least one state metric is required"));
        }
        let mut seen = HashSet::new();
        for m in &self.metrics {
            if !labels::is_known(&m.label) || m.label == labels::FREQ {
                return Err(config_err(format!("unsupported state metric '{}'", m.label)));
            }
            if !seen.insert(m.label.as_str()) {
                return Err(config_err(format!("duplicate state metric '{}'", m.label)));
            }
            if !(m.min < m.max) {
                return Err(config_err(format!(
                    "metric '{}' requires min < max (got {} .. {})",
                    m.label, m.min, m.max
                )));
            }
            if m.log_scale && m.min <= 0.0 {
                return Err(config_err(format!(
                    "metric '{}' is log-scaled and needs positive bounds",
                    m.label
                )));
            }
            if m.buckets == 0 {
                return Err(config_err(format!("metric '{}' needs at least one bucket", m.label)));
            }
        }
        Ok(())
    }

    fn validate_frequencies(&self) -> Result<()> {
        let f = &self.frequencies;
        if f.khz.is_empty() {
            return Err(config_err("frequencies.khz must not be empty"));
        }
        if f.khz.windows(2).any(|w| w[0] >= w[1]) {
            return Err(config_err("frequencies.khz must be strictly ascending"));
        }
        if f.volts.len() != f.khz.len() {
            return Err(config_err(format!(
                "frequencies.volts has {} entries for {} frequencies",
                f.volts.len(),
                f.khz.len()
            )));
        }
        if f.volts.iter().any(|v| *v <= 0.0) {
            return Err(config_err("frequencies.volts must be positive"));
        }
        Ok(())
    }

    fn validate_learning(&self) -> Result<()> {
        let l = &self.learning;
        if !(0.0..1.0).contains(&l.gamma) {
            return Err(config_err(format!("gamma {} outside [0, 1)", l.gamma)));
        }
        if !(l.alpha > 0.0 && l.alpha <= 1.0) {
            return Err(config_err(format!("alpha {} outside (0, 1]", l.alpha)));
        }
        if !(0.0..=1.0).contains(&l.lambda) {
            return Err(config_err(format!("lambda {} outside [0, 1]", l.lambda)));
        }
        if l.history == 0 {
            return Err(config_err("learning.history must be at least 1"));
        }
        if l.strategy == UpdateStrategy::NeighborhoodPenalty {
            for axis in &l.neighborhood_axes {
                if self.axis_of(axis).is_none() {
                    return Err(config_err(format!(
                        "neighborhood axis '{}' is not part of the state",
                        axis
                    )));
                }
            }
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> GovernorError {
    GovernorError::Config(msg.into())
}
