//! Health tracking for the governor
//!
//! Components report their own status; the control loop additionally
//! heartbeats once per tick so a stalled loop turns readiness off even when
//! no component has reported a failure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operating, with recent errors
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_ms: Option<i64>,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Worst status among the components
pub fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    components
        .values()
        .map(|c| c.status)
        .fold(ComponentStatus::Healthy, |worst, s| match (worst, s) {
            (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                ComponentStatus::Unhealthy
            }
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                ComponentStatus::Degraded
            }
            _ => ComponentStatus::Healthy,
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SAMPLER: &str = "sampler";
    pub const ACTUATOR: &str = "actuator";
    pub const LEARNER: &str = "learner";
    pub const PERSISTENCE: &str = "persistence";

    pub const ALL: &[&str] = &[SAMPLER, ACTUATOR, LEARNER, PERSISTENCE];
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    /// Wall-clock millis of the last completed tick, 0 before the first
    last_tick_ms: Arc<AtomicI64>,
    ticks: Arc<AtomicU64>,
    stall_after: Duration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HealthRegistry {
    /// `stall_after`: how long without a tick before the loop counts as stalled
    pub fn new(stall_after: Duration) -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
            ready: Arc::new(RwLock::new(false)),
            last_tick_ms: Arc::new(AtomicI64::new(0)),
            ticks: Arc::new(AtomicU64::new(0)),
            stall_after,
        }
    }

    /// Registry sized to a control period: stalled after 20 missed periods
    pub fn for_period(period: Duration) -> Self {
        Self::new((period * 20).max(Duration::from_secs(1)))
    }

    pub async fn register_all(&self) {
        let mut map = self.components.write().await;
        for name in components::ALL {
            map.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Heartbeat from the control loop
    pub fn record_tick(&self) {
        self.last_tick_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn last_tick(&self) -> Option<i64> {
        match self.last_tick_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    fn stalled(&self) -> bool {
        match self.last_tick() {
            Some(ms) => {
                let age = chrono::Utc::now().timestamp_millis() - ms;
                age > self.stall_after.as_millis() as i64
            }
            None => false,
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: overall_status(&components),
            ticks: self.ticks.load(Ordering::Relaxed),
            last_tick_ms: self.last_tick(),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let not_ready = |reason: &str| ReadinessResponse {
            ready: false,
            reason: Some(reason.to_string()),
        };

        if !*self.ready.read().await {
            return not_ready("Governor not yet initialized");
        }
        if overall_status(&*self.components.read().await) == ComponentStatus::Unhealthy {
            return not_ready("Critical component unhealthy");
        }
        if self.stalled() {
            return not_ready("Control loop stalled");
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let registry = HealthRegistry::default();
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
        assert_eq!(health.ticks, 0);
        assert!(health.last_tick_ms.is_none());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::default();
        registry.register_all().await;
        let health = registry.health().await;
        for name in components::ALL {
            assert_eq!(health.components[*name].status, ComponentStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_degraded_and_unhealthy_roll_up() {
        let registry = HealthRegistry::default();
        registry.register_all().await;

        registry.set_degraded(components::ACTUATOR, "write rejected").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::SAMPLER, "counters missing").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_transitions() {
        let registry = HealthRegistry::default();
        registry.register_all().await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::LEARNER, "invariant").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Critical component unhealthy"));
    }

    #[tokio::test]
    async fn test_stalled_loop_is_not_ready() {
        let registry = HealthRegistry::new(Duration::from_millis(0));
        registry.set_ready(true).await;
        registry.record_tick();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Control loop stalled"));
        assert_eq!(registry.health().await.ticks, 1);
    }
}
