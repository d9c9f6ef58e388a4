//! Control loop
//!
//! One tick: sample, discretize, learn from the previous action, select and
//! actuate the next one, then sleep out the rest of the period. The sleep is
//! the only wait raced against shutdown, so a tick is never interrupted
//! halfway.

use super::{Mode, Phase};
use crate::actions::{ActionOutcome, ActionSpace};
use crate::config::GovernorConfig;
use crate::discretizer::{current_frequency_index, StateEncoder};
use crate::error::{GovernorError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{labels, MetricSnapshot, StateVector};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::persistence::TableStore;
use crate::policy::EpsilonGreedy;
use crate::reward::RewardModel;
use crate::sensing::{Platform, Sampler};
use crate::value_store::{build_estimator, ValueEstimator, ValueTable};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Previous decision, consumed by the next tick's update
#[derive(Debug, Clone)]
struct LastStep {
    state: StateVector,
    outcome: ActionOutcome,
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    Acted {
        state: StateVector,
        outcome: ActionOutcome,
        explored: bool,
        reward: Option<f64>,
    },
    /// Sensing failed; nothing learned, frequency left alone
    Skipped,
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks: u64,
    pub skipped: u64,
    pub deadline_misses: u64,
    pub saved_to: Option<PathBuf>,
}

pub struct ControlLoop {
    config: GovernorConfig,
    mode: Mode,
    platform: Arc<dyn Platform>,
    sampler: Sampler,
    encoder: StateEncoder,
    actions: ActionSpace,
    reward: RewardModel,
    estimator: Box<dyn ValueEstimator>,
    policy: EpsilonGreedy,
    store: TableStore,
    health: HealthRegistry,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
    max_ticks: Option<u64>,
    phase: Phase,
    last: Option<LastStep>,
    ticks: u64,
    skipped: u64,
    deadline_misses: u64,
}

impl ControlLoop {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn table(&self) -> &ValueTable {
        self.estimator.table()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Take over the cluster and park it at the lowest frequency
    pub async fn init(&mut self) -> Result<()> {
        let cluster = self.config.controller.cluster;
        self.platform.prepare(cluster).await?;

        let lowest = self.config.frequencies.khz[0];
        if let Err(e) = self.platform.set_frequency(cluster, lowest).await {
            self.report_actuation_failure(lowest, &e).await;
        }

        self.health.set_ready(true).await;
        self.phase = Phase::WaitFirstSample;
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.mode.as_str(),
            &format!("{:?}", self.estimator.strategy()),
            self.table().cell_count(),
        );
        Ok(())
    }

    /// Run until shutdown, `max_ticks`, or a fatal error, then persist
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<RunSummary> {
        info!(
            period_ms = self.config.controller.period_ms,
            mode = self.mode.as_str(),
            "Starting control loop"
        );

        if self.phase == Phase::Init {
            self.init().await?;
        }

        let period = self.config.period();
        let mut reason = "shutdown";
        let mut failure = None;

        loop {
            if self.max_ticks.map_or(false, |max| self.ticks >= max) {
                reason = "tick limit reached";
                break;
            }

            let start = Instant::now();
            if let Err(e) = self.tick().await {
                self.health
                    .set_unhealthy(components::LEARNER, e.to_string())
                    .await;
                reason = "fatal error";
                failure = Some(e);
                break;
            }
            let elapsed = start.elapsed();
            self.metrics.observe_tick_latency(elapsed.as_secs_f64());
            self.health.record_tick();

            if deadline_missed(elapsed, period) {
                self.deadline_misses += 1;
                self.metrics.inc_deadline_misses();
                self.logger
                    .log_deadline_missed(elapsed.as_millis(), self.config.controller.period_ms);
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => continue,
                    _ => break,
                }
            }

            tokio::select! {
                _ = sleep(period - elapsed) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        let saved_to = self.persist().await;
        self.phase = Phase::Stopped;
        if let Err(e) = self.platform.release(self.config.controller.cluster).await {
            warn!(error = %e, "Failed to hand the cluster back");
        }
        self.health.set_ready(false).await;
        self.logger.log_shutdown(reason, self.ticks);

        match failure {
            Some(e) => Err(e),
            None => Ok(RunSummary {
                ticks: self.ticks,
                skipped: self.skipped,
                deadline_misses: self.deadline_misses,
                saved_to,
            }),
        }
    }

    /// One control period, without the sleep
    pub async fn tick(&mut self) -> Result<TickReport> {
        let tick = self.ticks;
        self.ticks += 1;

        let (snapshot, state) = match self.observe().await {
            Ok(observed) => observed,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.skipped += 1;
                self.metrics.inc_sensing_errors();
                self.health
                    .set_degraded(components::SAMPLER, e.to_string())
                    .await;
                self.logger.log_tick_skipped(tick, &e.to_string());
                return Ok(TickReport::Skipped);
            }
        };
        self.health.set_healthy(components::SAMPLER).await;

        let current_khz = snapshot.get(labels::FREQ).unwrap_or_default().round() as u32;
        let current_index = current_frequency_index(&self.config.frequencies, current_khz)?;
        self.metrics.set_frequency(current_khz);

        let reward = match self.last.take() {
            Some(last) => match self.learn(&snapshot, &state, &last) {
                Ok(reward) => Some(reward),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Transition dropped");
                    None
                }
            },
            None => None,
        };

        let decision = self.policy.select(self.estimator.as_ref(), &state)?;
        self.metrics.set_epsilon(decision.epsilon);

        let outcome = self.actions.resolve(decision.action, current_index)?;
        if outcome.clamped() {
            self.metrics.inc_boundary_violations();
        }
        if outcome.khz != current_khz {
            match self
                .platform
                .set_frequency(self.config.controller.cluster, outcome.khz)
                .await
            {
                Ok(()) => self.health.set_healthy(components::ACTUATOR).await,
                Err(e) => self.report_actuation_failure(outcome.khz, &e).await,
            }
        }

        self.last = Some(LastStep {
            state: state.clone(),
            outcome,
        });
        self.phase = Phase::Running;

        if self.mode.learns() {
            self.maybe_checkpoint().await;
        }

        Ok(TickReport::Acted {
            state,
            outcome,
            explored: decision.explored,
            reward,
        })
    }

    async fn observe(&self) -> Result<(MetricSnapshot, StateVector)> {
        let snapshot = self.sampler.sample().await?;
        let state = self.encoder.encode(&snapshot)?;
        Ok((snapshot, state))
    }

    /// Score the previous action against this tick's snapshot, updating the
    /// table when training
    fn learn(
        &mut self,
        snapshot: &MetricSnapshot,
        state: &StateVector,
        last: &LastStep,
    ) -> Result<f64> {
        let terms = self.reward.terms(snapshot, &last.outcome)?;
        let reward = terms.total();
        self.metrics.set_last_reward(reward);

        if self.mode.learns() {
            let value = self
                .estimator
                .update(&last.state, last.outcome.action, reward, state)?;
            self.logger
                .log_transition(&last.state, &last.outcome, &terms, value);
        }
        Ok(reward)
    }

    async fn report_actuation_failure(&self, khz: u32, e: &GovernorError) {
        self.metrics.inc_actuation_errors();
        self.health
            .set_degraded(components::ACTUATOR, e.to_string())
            .await;
        self.logger.log_actuation_failed(khz, &e.to_string());
    }

    async fn maybe_checkpoint(&self) {
        let every = self.config.controller.checkpoint_interval_ticks;
        if every > 0 && self.ticks % every == 0 {
            self.save_table().await;
        }
    }

    async fn save_table(&self) -> Option<PathBuf> {
        let table = self.estimator.table();
        self.metrics.set_visited_cells(table.visited_cells());
        match self.store.save(table) {
            Ok(path) => {
                self.metrics.inc_checkpoints_written();
                self.health.set_healthy(components::PERSISTENCE).await;
                self.logger
                    .log_checkpoint(&path.display().to_string(), table.visited_cells());
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save value table");
                self.health
                    .set_degraded(components::PERSISTENCE, e.to_string())
                    .await;
                None
            }
        }
    }

    async fn persist(&mut self) -> Option<PathBuf> {
        self.phase = Phase::Persist;
        if self.mode.learns() && self.config.controller.always_persist {
            self.save_table().await
        } else {
            debug!(mode = self.mode.as_str(), "Leaving saved table untouched");
            None
        }
    }
}

/// A tick finishing exactly on the period still made its deadline
pub(crate) fn deadline_missed(elapsed: Duration, period: Duration) -> bool {
    elapsed > period
}

/// Builder for creating the control loop
pub struct ControlLoopBuilder {
    config: GovernorConfig,
    mode: Mode,
    platform: Option<Arc<dyn Platform>>,
    health: Option<HealthRegistry>,
    table: Option<ValueTable>,
    max_ticks: Option<u64>,
}

impl ControlLoopBuilder {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            mode: Mode::Train,
            platform: None,
            health: None,
            table: None,
            max_ticks: None,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Start from this table instead of the saved one
    pub fn table(mut self, table: ValueTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Stop after this many ticks
    pub fn max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let config = self.config;
        config.validate()?;

        let platform = self
            .platform
            .ok_or_else(|| GovernorError::Config("a platform is required".to_string()))?;
        let logger = StructuredLogger::new(config.controller.cluster);
        let store = TableStore::from_config(&config);

        let table = match self.table {
            Some(table) => table,
            None => match (store.load(), self.mode) {
                (Ok(table), _) => table,
                (Err(e), Mode::Run) => return Err(e.into()),
                (Err(e), Mode::Train) => {
                    logger.log_table_fallback(&store.path().display().to_string(), &e.to_string());
                    store.layout().empty_table()
                }
            },
        };
        let estimator = build_estimator(&config, table)?;

        let policy = match self.mode {
            Mode::Train => EpsilonGreedy::from_config(&config),
            Mode::Run => EpsilonGreedy::from_config(&config).exploit_only(),
        };

        let health = self
            .health
            .unwrap_or_else(|| HealthRegistry::for_period(config.period()));

        Ok(ControlLoop {
            sampler: Sampler::from_config(Arc::clone(&platform), &config),
            encoder: StateEncoder::from_config(&config),
            actions: ActionSpace::from_config(&config),
            reward: RewardModel::from_config(&config),
            estimator,
            policy,
            store,
            health,
            metrics: GovernorMetrics::new(),
            logger,
            max_ticks: self.max_ticks,
            phase: Phase::Init,
            last: None,
            ticks: 0,
            skipped: 0,
            deadline_misses: 0,
            mode: self.mode,
            platform,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionConfig;
    use crate::error::PersistenceError;
    use crate::health::ComponentStatus;
    use crate::persistence::TableLayout;
    use crate::test_support::MockPlatform;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> GovernorConfig {
        let mut config = GovernorConfig::default();
        config.controller.period_ms = 1;
        config.controller.table_dir = dir.path().to_path_buf();
        config.controller.seed = Some(11);
        config.controller.checkpoint_interval_ticks = 0;
        config
    }

    fn train_loop(config: &GovernorConfig, platform: Arc<MockPlatform>) -> ControlLoop {
        ControlLoopBuilder::new(config.clone())
            .platform(platform)
            .max_ticks(6)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_parks_cluster_at_lowest_frequency() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(1_400_000));
        let mut control = train_loop(&config, platform.clone());

        control.init().await.unwrap();
        assert!(platform.prepared.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(platform.frequency(), 200_000);
        assert_eq!(control.phase(), Phase::WaitFirstSample);
    }

    #[tokio::test]
    async fn test_first_tick_does_not_learn() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(200_000));
        let mut control = train_loop(&config, platform);
        control.init().await.unwrap();

        match control.tick().await.unwrap() {
            TickReport::Acted { reward, .. } => assert!(reward.is_none()),
            TickReport::Skipped => panic!("tick skipped"),
        }
        assert_eq!(control.table().visited_cells(), 0);

        match control.tick().await.unwrap() {
            TickReport::Acted { reward, .. } => assert!(reward.is_some()),
            TickReport::Skipped => panic!("tick skipped"),
        }
        assert_eq!(control.table().visited_cells(), 1);
        assert_eq!(control.phase(), Phase::Running);
    }

    #[tokio::test]
    async fn test_train_run_learns_and_persists() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(200_000));
        let control = train_loop(&config, platform.clone());

        let (_tx, rx) = broadcast::channel(1);
        let summary = control.run(rx).await.unwrap();

        assert_eq!(summary.ticks, 6);
        let path = summary.saved_to.unwrap();
        assert!(path.ends_with("qtable_1ms.json"));
        assert!(platform.released.load(std::sync::atomic::Ordering::SeqCst));

        let saved = TableStore::from_config(&config).load().unwrap();
        let visits: u64 = saved.visit_counts().iter().sum();
        assert_eq!(visits, 5);
    }

    #[tokio::test]
    async fn test_run_mode_requires_saved_table() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let result = ControlLoopBuilder::new(config)
            .mode(Mode::Run)
            .platform(Arc::new(MockPlatform::new(200_000)))
            .build();
        assert!(matches!(
            result,
            Err(GovernorError::Persistence(PersistenceError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_mode_rejects_mismatched_table() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut other = config.clone();
        other.metrics[0].buckets = 4;
        TableStore::from_config(&other)
            .save(&TableLayout::from_config(&other).empty_table())
            .unwrap();

        let result = ControlLoopBuilder::new(config)
            .mode(Mode::Run)
            .platform(Arc::new(MockPlatform::new(200_000)))
            .build();
        assert!(matches!(
            result,
            Err(GovernorError::Persistence(PersistenceError::ShapeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_mode_never_learns_or_writes() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = TableStore::from_config(&config);
        let path = store.save(&store.layout().empty_table()).unwrap();
        let before = std::fs::read(&path).unwrap();

        let control = ControlLoopBuilder::new(config)
            .mode(Mode::Run)
            .platform(Arc::new(MockPlatform::new(200_000)))
            .max_ticks(5)
            .build()
            .unwrap();
        let (_tx, rx) = broadcast::channel(1);
        let summary = control.run(rx).await.unwrap();

        assert!(summary.saved_to.is_none());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_train_falls_back_to_fresh_table() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::write(TableStore::from_config(&config).path(), b"{ truncated").unwrap();

        let control = train_loop(&config, Arc::new(MockPlatform::new(200_000)));
        assert_eq!(control.table().visited_cells(), 0);
        assert_eq!(control.table().cell_count(), config.table_cells().unwrap());
    }

    #[tokio::test]
    async fn test_sensing_failure_skips_tick() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(200_000));
        let health = HealthRegistry::default();
        health.register_all().await;
        let mut control = ControlLoopBuilder::new(config)
            .platform(platform.clone())
            .health(health.clone())
            .build()
            .unwrap();
        control.init().await.unwrap();
        control.tick().await.unwrap();
        let writes_before = platform.writes().len();

        platform.fail_counters(true);
        assert_eq!(control.tick().await.unwrap(), TickReport::Skipped);
        assert_eq!(platform.writes().len(), writes_before);
        assert_eq!(control.table().visited_cells(), 0);
        assert_eq!(
            health.health().await.components[components::SAMPLER].status,
            ComponentStatus::Degraded
        );

        // The pending transition survives the skipped tick
        platform.fail_counters(false);
        control.tick().await.unwrap();
        assert_eq!(control.table().visited_cells(), 1);
    }

    #[tokio::test]
    async fn test_actuation_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.exploration = crate::config::ExplorationConfig::Fixed { epsilon: 1.0 };
        let platform = Arc::new(MockPlatform::new(200_000));
        platform.fail_writes(true);

        let control = ControlLoopBuilder::new(config)
            .platform(platform.clone())
            .max_ticks(10)
            .build()
            .unwrap();
        let (_tx, rx) = broadcast::channel(1);
        let summary = control.run(rx).await.unwrap();

        assert_eq!(summary.ticks, 10);
        assert!(!platform.writes().is_empty());
        assert_eq!(platform.frequency(), 200_000);
    }

    #[tokio::test]
    async fn test_unknown_frequency_stops_loop() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new(200_000).clamping_to(1_100_000));
        let control = train_loop(&config, platform);

        let (_tx, rx) = broadcast::channel(1);
        let err = control.run(rx).await.unwrap_err();
        assert!(matches!(err, GovernorError::UnknownFrequency { khz: 1_100_000 }));
    }

    #[tokio::test]
    async fn test_shutdown_signal_persists() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.controller.period_ms = 20;
        let control = ControlLoopBuilder::new(config.clone())
            .platform(Arc::new(MockPlatform::new(200_000)))
            .build()
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(rx));
        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(()).unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.ticks >= 1);
        assert!(summary.saved_to.is_some());
        assert!(TableStore::from_config(&config).path().exists());
    }

    #[tokio::test]
    async fn test_checkpoint_interval_without_final_save() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.controller.checkpoint_interval_ticks = 2;
        config.controller.always_persist = false;

        let control = train_loop(&config, Arc::new(MockPlatform::new(200_000)));
        let (_tx, rx) = broadcast::channel(1);
        let summary = control.run(rx).await.unwrap();

        assert!(summary.saved_to.is_none());
        assert!(TableStore::from_config(&config).path().exists());
    }

    #[tokio::test]
    async fn test_relative_actions_step_from_current_frequency() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.actions = ActionConfig::Relative { steps: 3 };
        let platform = Arc::new(MockPlatform::new(200_000));
        let mut control = train_loop(&config, platform.clone());
        control.init().await.unwrap();

        for _ in 0..20 {
            let before = platform.frequency();
            if let TickReport::Acted { outcome, .. } = control.tick().await.unwrap() {
                let from = config.frequencies.index_of(before).unwrap() as i64;
                assert!((outcome.requested_index - from).abs() <= 1);
                assert_eq!(platform.frequency(), outcome.khz);
            }
        }
    }

    #[tokio::test]
    async fn test_reward_is_attributed_to_previous_decision() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.actions = ActionConfig::Relative { steps: 3 };
        config.exploration = crate::config::ExplorationConfig::Fixed { epsilon: 1.0 };
        config.learning.alpha = 1.0;
        config.learning.gamma = 0.0;

        let platform = Arc::new(MockPlatform::new(200_000));
        let mut control = ControlLoopBuilder::new(config.clone())
            .platform(platform.clone())
            .build()
            .unwrap();
        control.init().await.unwrap();

        // Same readings the loop sees, taken just before each tick
        let sampler = Sampler::from_config(platform.clone(), &config);
        let model = RewardModel::from_config(&config);
        let top = config.frequencies.khz.len() - 1;

        let mut previous: Option<(StateVector, ActionOutcome)> = None;
        let (mut clamped, mut edge_moves) = (0, 0);
        for _ in 0..300 {
            let snapshot = sampler.sample().await.unwrap();
            let TickReport::Acted {
                state,
                outcome,
                reward,
                ..
            } = control.tick().await.unwrap()
            else {
                panic!("tick skipped");
            };

            match previous.take() {
                None => assert!(reward.is_none()),
                Some((prev_state, prev_outcome)) => {
                    let expected = model.reward(&snapshot, &prev_outcome).unwrap();
                    assert_eq!(reward, Some(expected));

                    // alpha = 1 and gamma = 0: the updated cell holds the reward
                    let stored = control
                        .table()
                        .value(&prev_state, prev_outcome.action)
                        .unwrap();
                    assert!((stored - expected).abs() < 1e-9);

                    if prev_outcome.clamped() {
                        assert!(expected < -config.reward.boundary_penalty / 2.0);
                        clamped += 1;
                    } else if prev_outcome.applied_index == 0 || prev_outcome.applied_index == top {
                        assert!(expected > -1.0);
                        edge_moves += 1;
                    }
                }
            }
            previous = Some((state, outcome));
        }

        assert!(clamped > 0);
        assert!(edge_moves > 0);
    }

    #[test]
    fn test_deadline_miss_requires_overrun() {
        let period = Duration::from_millis(50);
        assert!(!deadline_missed(Duration::from_millis(49), period));
        assert!(!deadline_missed(period, period));
        assert!(deadline_missed(period + Duration::from_nanos(1), period));
    }

    #[test]
    fn test_builder_requires_platform() {
        let dir = TempDir::new().unwrap();
        assert!(ControlLoopBuilder::new(test_config(&dir)).build().is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.learning.alpha = 2.0;
        let result = ControlLoopBuilder::new(config)
            .platform(Arc::new(MockPlatform::new(200_000)))
            .build();
        assert!(matches!(result, Err(GovernorError::Config(_))));
    }
}
