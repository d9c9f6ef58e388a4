//! Action-value store and learning rules
//!
//! Every rule works on the same [`ValueTable`]. The control loop only sees a
//! `Box<dyn ValueEstimator>`, so the rule is picked once from configuration.

mod lambda;
mod neighborhood;
mod one_step;
mod table;

pub use lambda::LambdaReturn;
pub use neighborhood::NeighborhoodPenalty;
pub use one_step::OneStep;
pub use table::ValueTable;

use crate::config::{GovernorConfig, UpdateStrategy};
use crate::error::{GovernorError, Result};
use crate::models::{Action, StateVector};

/// A learning rule over a value table
pub trait ValueEstimator: Send + Sync {
    fn strategy(&self) -> UpdateStrategy;

    fn table(&self) -> &ValueTable;

    /// Learn from `(last_state, last_action) -> reward -> next_state`,
    /// returning the new value of the updated cell
    fn update(
        &mut self,
        last_state: &StateVector,
        last_action: Action,
        reward: f64,
        next_state: &StateVector,
    ) -> Result<f64>;

    /// Per-action values of a state
    fn estimate(&self, state: &StateVector) -> Result<&[f64]> {
        self.table().row(state)
    }

    fn visits(&self, state: &StateVector, action: Action) -> Result<u64> {
        self.table().visits(state, action)
    }

    /// Total visits over every action of a state
    fn state_visits(&self, state: &StateVector) -> Result<u64> {
        Ok(self.table().visit_row(state)?.iter().sum())
    }
}

/// Build the configured rule around `table`
pub fn build_estimator(
    config: &GovernorConfig,
    table: ValueTable,
) -> Result<Box<dyn ValueEstimator>> {
    let expected = config.state_dims();
    if table.dims() != expected.as_slice() || table.actions() != config.action_count() {
        return Err(GovernorError::Invariant(format!(
            "table {:?} x {} does not match configured {:?} x {}",
            table.dims(),
            table.actions(),
            expected,
            config.action_count()
        )));
    }

    let l = &config.learning;
    let estimator: Box<dyn ValueEstimator> = match l.strategy {
        UpdateStrategy::OneStep => Box::new(OneStep::new(table, l.alpha, l.gamma)),
        UpdateStrategy::LambdaReturn => {
            Box::new(LambdaReturn::new(table, l.gamma, l.lambda, l.history))
        }
        UpdateStrategy::NeighborhoodPenalty => {
            let axes = l
                .neighborhood_axes
                .iter()
                .map(|label| {
                    config.axis_of(label).ok_or_else(|| {
                        GovernorError::Config(format!(
                            "neighborhood axis '{}' is not part of the state",
                            label
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Box::new(NeighborhoodPenalty::new(table, l.alpha, l.gamma, axes))
        }
    };
    Ok(estimator)
}
