//! Dense action-value table
//!
//! Values and visit counts are stored row-major: the last state axis varies
//! fastest, followed by the action. Every index is checked; nothing is
//! clamped here.

use crate::error::{GovernorError, Result};
use crate::models::{Action, StateVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueTable {
    dims: Vec<usize>,
    actions: usize,
    values: Vec<f64>,
    visits: Vec<u64>,
}

impl ValueTable {
    /// Zero-initialized table
    pub fn new(dims: Vec<usize>, actions: usize) -> Self {
        let cells = dims.iter().product::<usize>() * actions;
        Self {
            dims,
            actions,
            values: vec![0.0; cells],
            visits: vec![0; cells],
        }
    }

    /// Rebuild from stored parts, checking the lengths agree
    pub fn from_parts(
        dims: Vec<usize>,
        actions: usize,
        values: Vec<f64>,
        visits: Vec<u64>,
    ) -> Result<Self> {
        let cells = dims.iter().product::<usize>() * actions;
        if values.len() != cells || visits.len() != cells {
            return Err(GovernorError::Invariant(format!(
                "table {:?} x {} needs {} cells, got {} values and {} visit counts",
                dims,
                actions,
                cells,
                values.len(),
                visits.len()
            )));
        }
        Ok(Self {
            dims,
            actions,
            values,
            visits,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn visit_counts(&self) -> &[u64] {
        &self.visits
    }

    pub fn state_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn cell_count(&self) -> usize {
        self.values.len()
    }

    /// Offset of the first cell of a state's row
    fn row_offset(&self, state: &[usize]) -> Result<usize> {
        if state.len() != self.dims.len() {
            return Err(GovernorError::Invariant(format!(
                "state {:?} has {} axes, table has {}",
                state,
                state.len(),
                self.dims.len()
            )));
        }
        let mut offset = 0usize;
        for (axis, (&s, &d)) in state.iter().zip(&self.dims).enumerate() {
            if s >= d {
                return Err(GovernorError::Invariant(format!(
                    "state component {} = {} outside [0, {})",
                    axis, s, d
                )));
            }
            offset = offset * d + s;
        }
        Ok(offset * self.actions)
    }

    /// Flat index of one cell
    pub fn index(&self, state: &[usize], action: Action) -> Result<usize> {
        if action >= self.actions {
            return Err(GovernorError::Invariant(format!(
                "action {} outside [0, {})",
                action, self.actions
            )));
        }
        Ok(self.row_offset(state)? + action)
    }

    /// Values of every action in a state
    pub fn row(&self, state: &StateVector) -> Result<&[f64]> {
        let start = self.row_offset(state.as_slice())?;
        Ok(&self.values[start..start + self.actions])
    }

    /// Visit counts of every action in a state
    pub fn visit_row(&self, state: &StateVector) -> Result<&[u64]> {
        let start = self.row_offset(state.as_slice())?;
        Ok(&self.visits[start..start + self.actions])
    }

    pub fn value(&self, state: &StateVector, action: Action) -> Result<f64> {
        Ok(self.values[self.index(state.as_slice(), action)?])
    }

    pub fn visits(&self, state: &StateVector, action: Action) -> Result<u64> {
        Ok(self.visits[self.index(state.as_slice(), action)?])
    }

    /// Greedy bootstrap value: max over all actions of a state
    pub fn max_value(&self, state: &StateVector) -> Result<f64> {
        Ok(self
            .row(state)?
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    /// Highest-valued visited action, lowest index on ties
    pub fn greedy_visited(&self, state: &StateVector) -> Result<Option<Action>> {
        let values = self.row(state)?;
        let visits = self.visit_row(state)?;
        let mut best: Option<(Action, f64)> = None;
        for (action, (&v, &n)) in values.iter().zip(visits).enumerate() {
            if n == 0 {
                continue;
            }
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((action, v)),
            }
        }
        Ok(best.map(|(a, _)| a))
    }

    pub(crate) fn value_at(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub(crate) fn set_value_at(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }

    pub(crate) fn add_value_at(&mut self, index: usize, delta: f64) {
        self.values[index] += delta;
    }

    /// Increment and return the new visit count
    pub(crate) fn record_visit_at(&mut self, index: usize) -> u64 {
        self.visits[index] = self.visits[index].saturating_add(1);
        self.visits[index]
    }

    /// Cells with at least one visit
    pub fn visited_cells(&self) -> usize {
        self.visits.iter().filter(|&&n| n > 0).count()
    }

    /// States with at least one visited action
    pub fn visited_states(&self) -> usize {
        self.visits
            .chunks(self.actions.max(1))
            .filter(|row| row.iter().any(|&n| n > 0))
            .count()
    }

    /// State vector of the `n`th row
    pub fn state_at(&self, mut n: usize) -> StateVector {
        let mut state = vec![0; self.dims.len()];
        for (slot, &d) in state.iter_mut().zip(&self.dims).rev() {
            *slot = n % d;
            n /= d;
        }
        StateVector(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_indexing() {
        let table = ValueTable::new(vec![2, 3], 4);
        assert_eq!(table.cell_count(), 24);
        assert_eq!(table.index(&[0, 0], 0).unwrap(), 0);
        assert_eq!(table.index(&[0, 1], 0).unwrap(), 4);
        assert_eq!(table.index(&[1, 0], 2).unwrap(), 14);
        assert_eq!(table.index(&[1, 2], 3).unwrap(), 23);
    }

    #[test]
    fn test_out_of_range_is_invariant_error() {
        let table = ValueTable::new(vec![2, 3], 4);
        assert!(matches!(
            table.index(&[2, 0], 0),
            Err(GovernorError::Invariant(_))
        ));
        assert!(matches!(
            table.index(&[0, 0], 4),
            Err(GovernorError::Invariant(_))
        ));
        assert!(table.index(&[0], 0).is_err());
    }

    #[test]
    fn test_state_at_inverts_row_offset() {
        let table = ValueTable::new(vec![3, 2, 4], 1);
        for n in 0..table.state_count() {
            let state = table.state_at(n);
            assert_eq!(table.index(state.as_slice(), 0).unwrap(), n);
        }
    }

    #[test]
    fn test_greedy_visited_ignores_unvisited() {
        let mut table = ValueTable::new(vec![1], 3);
        let state = StateVector(vec![0]);
        assert_eq!(table.greedy_visited(&state).unwrap(), None);

        table.set_value_at(0, 10.0);
        table.set_value_at(1, -1.0);
        table.record_visit_at(1);
        assert_eq!(table.greedy_visited(&state).unwrap(), Some(1));

        table.set_value_at(2, -1.0);
        table.record_visit_at(2);
        assert_eq!(table.greedy_visited(&state).unwrap(), Some(1));
    }

    #[test]
    fn test_coverage_counts() {
        let mut table = ValueTable::new(vec![2, 2], 2);
        table.record_visit_at(0);
        table.record_visit_at(1);
        table.record_visit_at(6);
        assert_eq!(table.visited_cells(), 3);
        assert_eq!(table.visited_states(), 2);
    }

    #[test]
    fn test_from_parts_rejects_wrong_length() {
        assert!(ValueTable::from_parts(vec![2], 2, vec![0.0; 3], vec![0; 4]).is_err());
        assert!(ValueTable::from_parts(vec![2], 2, vec![0.0; 4], vec![0; 4]).is_ok());
    }
}
