//! Mapping from action indices to cluster frequencies

use crate::config::{ActionConfig, GovernorConfig};
use crate::error::{GovernorError, Result};
use crate::models::Action;
use serde::Serialize;

/// Ordered action set over the configured frequencies
#[derive(Debug, Clone)]
pub enum ActionSpace {
    /// Action `i` selects frequency `i`
    Absolute { freqs: Vec<u32> },
    /// Action `i` moves `i - steps / 2` frequency steps from the current one
    Relative { freqs: Vec<u32>, steps: usize },
}

/// What the actuator was asked to do for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: Action,
    /// Frequency index the action asked for, possibly outside the list
    pub requested_index: i64,
    /// Frequency index after clamping into the list
    pub applied_index: usize,
    pub khz: u32,
}

impl ActionOutcome {
    /// True when the request had to be clamped to a valid frequency
    pub fn clamped(&self) -> bool {
        self.requested_index != self.applied_index as i64
    }
}

impl ActionSpace {
    pub fn from_config(config: &GovernorConfig) -> Self {
        let freqs = config.frequencies.khz.clone();
        match config.actions {
            ActionConfig::Absolute => ActionSpace::Absolute { freqs },
            ActionConfig::Relative { steps } => ActionSpace::Relative { freqs, steps },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ActionSpace::Absolute { freqs } => freqs.len(),
            ActionSpace::Relative { steps, .. } => *steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn freqs(&self) -> &[u32] {
        match self {
            ActionSpace::Absolute { freqs } | ActionSpace::Relative { freqs, .. } => freqs,
        }
    }

    /// Resolve an action against the frequency currently in effect
    pub fn resolve(&self, action: Action, current_index: usize) -> Result<ActionOutcome> {
        if action >= self.len() {
            return Err(GovernorError::Invariant(format!(
                "action {} outside [0, {})",
                action,
                self.len()
            )));
        }
        let freqs = self.freqs();
        let top = freqs.len() as i64 - 1;

        let requested_index = match self {
            ActionSpace::Absolute { .. } => action as i64,
            ActionSpace::Relative { steps, .. } => {
                let pivot = (*steps / 2) as i64;
                current_index as i64 + (action as i64 - pivot)
            }
        };
        let applied_index = requested_index.clamp(0, top) as usize;

        Ok(ActionOutcome {
            action,
            requested_index,
            applied_index,
            khz: freqs[applied_index],
        })
    }
}
