use super::{ValueEstimator, ValueTable};
use crate::config::UpdateStrategy;
use crate::error::Result;
use crate::models::{Action, StateVector};

/// Off-policy one-step update with a constant step size
#[derive(Debug, Clone)]
pub struct OneStep {
    table: ValueTable,
    alpha: f64,
    gamma: f64,
}

impl OneStep {
    pub fn new(table: ValueTable, alpha: f64, gamma: f64) -> Self {
        Self {
            table,
            alpha,
            gamma,
        }
    }
}

impl ValueEstimator for OneStep {
    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::OneStep
    }

    fn table(&self) -> &ValueTable {
        &self.table
    }

    fn update(
        &mut self,
        last_state: &StateVector,
        last_action: Action,
        reward: f64,
        next_state: &StateVector,
    ) -> Result<f64> {
        let idx = self.table.index(last_state.as_slice(), last_action)?;
        let best_next = self.table.max_value(next_state)?;
        let target = reward + self.gamma * best_next;

        let q = self.table.value_at(idx);
        let updated = q + self.alpha * (target - q);
        self.table.set_value_at(idx, updated);
        self.table.record_visit_at(idx);
        Ok(updated)
    }
}
