use super::{ValueEstimator, ValueTable};
use crate::config::UpdateStrategy;
use crate::error::Result;
use crate::models::{Action, StateVector};

/// One-step delta broadcast over a slice of neighbouring states
///
/// The slice starts at the observed state and extends to the top of every
/// swept axis. All other axes are held at the observed coordinate. Only the
/// observed cell's visit count moves.
#[derive(Debug, Clone)]
pub struct NeighborhoodPenalty {
    table: ValueTable,
    alpha: f64,
    gamma: f64,
    swept: Vec<usize>,
}

impl NeighborhoodPenalty {
    pub fn new(table: ValueTable, alpha: f64, gamma: f64, swept: Vec<usize>) -> Self {
        Self {
            table,
            alpha,
            gamma,
            swept,
        }
    }

    /// Inclusive-exclusive bounds of the slice anchored at `state`
    fn slice_bounds(&self, state: &[usize]) -> Vec<(usize, usize)> {
        state
            .iter()
            .zip(self.table.dims())
            .enumerate()
            .map(|(axis, (&s, &d))| {
                if self.swept.contains(&axis) {
                    (s, d)
                } else {
                    (s, s + 1)
                }
            })
            .collect()
    }
}

/// Odometer walk over a multi-dimensional range, last axis fastest
struct RangeWalk {
    bounds: Vec<(usize, usize)>,
    cursor: Option<Vec<usize>>,
}

impl RangeWalk {
    fn new(bounds: Vec<(usize, usize)>) -> Self {
        let empty = bounds.iter().any(|&(lo, hi)| lo >= hi);
        let cursor = (!empty).then(|| bounds.iter().map(|&(lo, _)| lo).collect());
        Self { bounds, cursor }
    }
}

impl Iterator for RangeWalk {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.cursor.take()?;
        let mut advanced = current.clone();
        for axis in (0..advanced.len()).rev() {
            advanced[axis] += 1;
            if advanced[axis] < self.bounds[axis].1 {
                self.cursor = Some(advanced);
                break;
            }
            advanced[axis] = self.bounds[axis].0;
        }
        Some(current)
    }
}

impl ValueEstimator for NeighborhoodPenalty {
    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::NeighborhoodPenalty
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
        let observed = self.table.index(last_state.as_slice(), last_action)?;
        let target = reward + self.gamma * self.table.max_value(next_state)?;
        let delta = self.alpha * (target - self.table.value_at(observed));

        for cell in RangeWalk::new(self.slice_bounds(last_state.as_slice())) {
            let idx = self.table.index(&cell, last_action)?;
            self.table.add_value_at(idx, delta);
        }
        self.table.record_visit_at(observed);

        Ok(self.table.value_at(observed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[usize]) -> StateVector {
        StateVector(v.to_vec())
    }

    #[test]
    fn test_range_walk_order() {
        let cells: Vec<_> = RangeWalk::new(vec![(1, 3), (0, 1), (2, 4)]).collect();
        assert_eq!(
            cells,
            vec![vec![1, 0, 2], vec![1, 0, 3], vec![2, 0, 2], vec![2, 0, 3]]
        );
        assert_eq!(RangeWalk::new(vec![(2, 2)]).count(), 0);
    }

    #[test]
    fn test_slice_covers_swept_axes_only() {
        // axes: ipc (swept), mpki (fixed), freq (swept)
        let mut est = NeighborhoodPenalty::new(ValueTable::new(vec![3, 2, 3], 2), 0.5, 0.0, vec![0, 2]);
        let v = est.update(&s(&[1, 0, 1]), 1, -4.0, &s(&[0, 0, 0])).unwrap();
        assert!((v - -2.0).abs() < 1e-12);

        let table = est.table();
        let mut touched = 0;
        for n in 0..table.state_count() {
            let state = table.state_at(n);
            let st = state.as_slice();
            let inside = st[0] >= 1 && st[1] == 0 && st[2] >= 1;
            let expected = if inside { -2.0 } else { 0.0 };
            assert_eq!(table.value(&state, 1).unwrap(), expected, "{:?}", st);
            assert_eq!(table.value(&state, 0).unwrap(), 0.0);
            if inside {
                touched += 1;
            }
        }
        assert_eq!(touched, 4);
    }

    #[test]
    fn test_only_observed_cell_counts_visit() {
        let mut est = NeighborhoodPenalty::new(ValueTable::new(vec![3], 1), 0.5, 0.0, vec![0]);
        est.update(&s(&[0]), 0, 1.0, &s(&[0])).unwrap();
        assert_eq!(est.visits(&s(&[0]), 0).unwrap(), 1);
        assert_eq!(est.visits(&s(&[2]), 0).unwrap(), 0);
        assert_eq!(est.table().value(&s(&[2]), 0).unwrap(), 0.5);
    }

    #[test]
    fn test_top_corner_touches_single_cell() {
        let mut est = NeighborhoodPenalty::new(ValueTable::new(vec![2, 2], 1), 1.0, 0.0, vec![0, 1]);
        est.update(&s(&[1, 1]), 0, 3.0, &s(&[0, 0])).unwrap();
        assert_eq!(est.table().values().iter().filter(|&&v| v != 0.0).count(), 1);
    }

    #[test]
    fn test_rejects_out_of_range_state() {
        let mut est = NeighborhoodPenalty::new(ValueTable::new(vec![2], 1), 0.5, 0.0, vec![0]);
        assert!(est.update(&s(&[2]), 0, 1.0, &s(&[0])).is_err());
        assert!(est.table().values().iter().all(|&v| v == 0.0));
    }
}
