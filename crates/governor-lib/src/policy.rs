//! Epsilon-greedy action selection

use crate::config::{ExplorationConfig, GovernorConfig};
use crate::error::Result;
use crate::models::{Action, StateVector};
use crate::value_store::ValueEstimator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Outcome of one selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub action: Action,
    /// True when the action came from the random branch
    pub explored: bool,
    pub epsilon: f64,
}

#[derive(Debug, Clone)]
pub struct EpsilonGreedy {
    schedule: ExplorationConfig,
    explore: bool,
    rng: StdRng,
}

impl EpsilonGreedy {
    pub fn new(schedule: ExplorationConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            schedule,
            explore: true,
            rng,
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(config.exploration.clone(), config.controller.seed)
    }

    /// Never take the random branch on purpose; unvisited states still
    /// fall back to a random action
    pub fn exploit_only(mut self) -> Self {
        self.explore = false;
        self
    }

    /// Exploration probability for a state
    pub fn epsilon(&self, estimator: &dyn ValueEstimator, state: &StateVector) -> Result<f64> {
        if !self.explore {
            return Ok(0.0);
        }
        Ok(match self.schedule {
            ExplorationConfig::Fixed { epsilon } => epsilon,
            ExplorationConfig::Annealed { n0 } => {
                let n = estimator.state_visits(state)? as f64;
                n0 / (n0 + n)
            }
        })
    }

    pub fn select(
        &mut self,
        estimator: &dyn ValueEstimator,
        state: &StateVector,
    ) -> Result<Decision> {
        let epsilon = self.epsilon(estimator, state)?;
        let actions = estimator.table().actions();

        let greedy = estimator.table().greedy_visited(state)?;
        let explored = greedy.is_none() || self.rng.gen::<f64>() < epsilon;

        let action = match greedy {
            Some(action) if !explored => action,
            _ => self.rng.gen_range(0..actions),
        };

        Ok(Decision {
            action,
            explored,
            epsilon,
        })
    }
}
