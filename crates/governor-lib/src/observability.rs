//! Observability infrastructure for the governor
//!
//! Provides:
//! - Prometheus metrics (tick latency, deadline misses, reward, frequency, table coverage)
//! - Structured JSON logging with tracing

use crate::actions::ActionOutcome;
use crate::models::StateVector;
use crate::reward::RewardTerms;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Histogram buckets for tick latency (in seconds), dense around typical periods
const TICK_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once); `None` when registration failed
static GLOBAL_METRICS: OnceLock<Option<GovernorMetricsInner>> = OnceLock::new();

struct GovernorMetricsInner {
    tick_latency_seconds: Histogram,
    deadline_misses: IntCounter,
    sensing_errors: IntCounter,
    actuation_errors: IntCounter,
    boundary_violations: IntCounter,
    checkpoints_written: IntCounter,
    last_reward: Gauge,
    epsilon: Gauge,
    frequency_khz: IntGauge,
    visited_cells: IntGauge,
}

impl GovernorMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            tick_latency_seconds: register_histogram!(
                "rl_governor_tick_latency_seconds",
                "Time spent sensing, deciding and actuating in one tick",
                TICK_BUCKETS.to_vec()
            )?,
            deadline_misses: register_int_counter!(
                "rl_governor_deadline_misses_total",
                "Ticks that took longer than the control period"
            )?,
            sensing_errors: register_int_counter!(
                "rl_governor_sensing_errors_total",
                "Ticks skipped because a sensor or counter read failed"
            )?,
            actuation_errors: register_int_counter!(
                "rl_governor_actuation_errors_total",
                "Frequency writes rejected by the platform"
            )?,
            boundary_violations: register_int_counter!(
                "rl_governor_boundary_violations_total",
                "Relative actions clamped at the edge of the frequency list"
            )?,
            checkpoints_written: register_int_counter!(
                "rl_governor_checkpoints_written_total",
                "Value tables written to disk"
            )?,
            last_reward: register_gauge!(
                "rl_governor_last_reward",
                "Reward of the most recent transition"
            )?,
            epsilon: register_gauge!(
                "rl_governor_epsilon",
                "Exploration probability used for the most recent decision"
            )?,
            frequency_khz: register_int_gauge!(
                "rl_governor_frequency_khz",
                "Cluster frequency currently in effect"
            )?,
            visited_cells: register_int_gauge!(
                "rl_governor_visited_cells",
                "Value-table cells visited at least once"
            )?,
        })
    }
}

/// Governor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct GovernorMetrics {
    _private: (),
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorMetrics {
    /// Create a handle, registering the metrics on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match GovernorMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register metrics, continuing without them");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&GovernorMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.tick_latency_seconds.observe(duration_secs);
        }
    }

    pub fn inc_deadline_misses(&self) {
        if let Some(m) = self.inner() {
            m.deadline_misses.inc();
        }
    }

    pub fn inc_sensing_errors(&self) {
        if let Some(m) = self.inner() {
            m.sensing_errors.inc();
        }
    }

    pub fn inc_actuation_errors(&self) {
        if let Some(m) = self.inner() {
            m.actuation_errors.inc();
        }
    }

    pub fn inc_boundary_violations(&self) {
        if let Some(m) = self.inner() {
            m.boundary_violations.inc();
        }
    }

    pub fn inc_checkpoints_written(&self) {
        if let Some(m) = self.inner() {
            m.checkpoints_written.inc();
        }
    }

    pub fn set_last_reward(&self, reward: f64) {
        if let Some(m) = self.inner() {
            m.last_reward.set(reward);
        }
    }

    pub fn set_epsilon(&self, epsilon: f64) {
        if let Some(m) = self.inner() {
            m.epsilon.set(epsilon);
        }
    }

    pub fn set_frequency(&self, khz: u32) {
        if let Some(m) = self.inner() {
            m.frequency_khz.set(khz as i64);
        }
    }

    pub fn set_visited_cells(&self, cells: usize) {
        if let Some(m) = self.inner() {
            m.visited_cells.set(cells as i64);
        }
    }
}

/// Structured logger for governor events
///
/// Every event carries an `event` name and the controlled cluster so log
/// pipelines can filter without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: usize,
}

impl StructuredLogger {
    pub fn new(cluster: usize) -> Self {
        Self { cluster }
    }

    pub fn log_startup(&self, version: &str, mode: &str, strategy: &str, cells: usize) {
        info!(
            event = "governor_started",
            cluster = self.cluster,
            governor_version = %version,
            mode = %mode,
            strategy = %strategy,
            table_cells = cells,
            "RL governor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str, ticks: u64) {
        info!(
            event = "governor_stopped",
            cluster = self.cluster,
            reason = %reason,
            ticks = ticks,
            "RL governor stopped"
        );
    }

    /// One learning step; debug level because it fires every period
    pub fn log_transition(
        &self,
        state: &StateVector,
        outcome: &ActionOutcome,
        terms: &RewardTerms,
        value: f64,
    ) {
        debug!(
            event = "transition",
            cluster = self.cluster,
            state = ?state.as_slice(),
            action = outcome.action,
            khz = outcome.khz,
            throughput = terms.throughput,
            power = terms.power,
            thermal = terms.thermal,
            boundary = terms.boundary,
            reward = terms.total(),
            value = value,
            "Value updated"
        );
    }

    pub fn log_deadline_missed(&self, elapsed_ms: u128, period_ms: u64) {
        warn!(
            event = "deadline_missed",
            cluster = self.cluster,
            elapsed_ms = elapsed_ms as u64,
            period_ms = period_ms,
            "Tick overran the control period"
        );
    }

    pub fn log_checkpoint(&self, path: &str, visited_cells: usize) {
        info!(
            event = "table_checkpointed",
            cluster = self.cluster,
            path = %path,
            visited_cells = visited_cells,
            "Value table saved"
        );
    }

    /// Training started from a zero table because no usable table was found
    pub fn log_table_fallback(&self, path: &str, reason: &str) {
        warn!(
            event = "table_fallback",
            cluster = self.cluster,
            path = %path,
            reason = %reason,
            "Starting from a fresh value table"
        );
    }

    pub fn log_actuation_failed(&self, khz: u32, error: &str) {
        error!(
            event = "actuation_failed",
            cluster = self.cluster,
            khz = khz,
            error = %error,
            "Frequency write failed"
        );
    }

    pub fn log_tick_skipped(&self, tick: u64, error: &str) {
        warn!(
            event = "tick_skipped",
            cluster = self.cluster,
            tick = tick,
            error = %error,
            "Sensing failed, tick skipped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_metrics_creation() {
        let metrics = GovernorMetrics::new();
        let again = GovernorMetrics::new();

        metrics.observe_tick_latency(0.004);
        metrics.inc_deadline_misses();
        metrics.set_last_reward(-24.3);
        metrics.set_epsilon(0.2);
        again.set_frequency(1_400_000);
        again.set_visited_cells(12);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new(4);
        assert_eq!(logger.cluster, 4);
        logger.log_tick_skipped(3, "counter read failed");
    }
}
