use super::{ValueEstimator, ValueTable};
use crate::config::UpdateStrategy;
use crate::error::Result;
use crate::models::{Action, StateVector, Transition};
use std::collections::VecDeque;

/// Lambda-return over a bounded transition history
///
/// Each update appends the new transition and moves every buffered cell
/// toward its composite return with a `1 / visits` step. Targets are all
/// computed from the table as it stood before the update.
#[derive(Debug, Clone)]
pub struct LambdaReturn {
    table: ValueTable,
    gamma: f64,
    lambda: f64,
    capacity: usize,
    history: VecDeque<Transition>,
}

impl LambdaReturn {
    pub fn new(table: ValueTable, gamma: f64, lambda: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            table,
            gamma,
            lambda,
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// State reached `offset` steps into the history
    fn state_at<'a>(&'a self, offset: usize, next_state: &'a StateVector) -> &'a StateVector {
        self.history
            .get(offset)
            .map(|t| &t.state)
            .unwrap_or(next_state)
    }

    /// Composite return for the entry at `start`
    fn composite(&self, start: usize, next_state: &StateVector) -> Result<f64> {
        let slack = self.history.len() - start;
        let mut partial = 0.0;
        let mut discount = 1.0;
        let mut weight = 1.0 - self.lambda;
        let mut total = 0.0;

        for k in 1..=slack {
            partial += discount * self.history[start + k - 1].reward;
            discount *= self.gamma;
            let g = partial + discount * self.table.max_value(self.state_at(start + k, next_state))?;
            if k == slack {
                total += self.lambda.powi(slack as i32 - 1) * g;
            } else {
                total += weight * g;
                weight *= self.lambda;
            }
        }
        Ok(total)
    }
}

impl ValueEstimator for LambdaReturn {
    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::LambdaReturn
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
        let newest = self.table.index(last_state.as_slice(), last_action)?;
        self.table.row(next_state)?;

        self.history.push_back(Transition {
            state: last_state.clone(),
            action: last_action,
            reward,
        });

        let targets = (0..self.history.len())
            .map(|i| {
                let t = &self.history[i];
                let idx = self.table.index(t.state.as_slice(), t.action)?;
                Ok((idx, self.composite(i, next_state)?))
            })
            .collect::<Result<Vec<_>>>()?;

        for (idx, target) in targets {
            let visits = self.table.record_visit_at(idx) as f64;
            let q = self.table.value_at(idx);
            self.table.set_value_at(idx, q + (target - q) / visits);
        }

        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }

        Ok(self.table.value_at(newest))
    }
}
