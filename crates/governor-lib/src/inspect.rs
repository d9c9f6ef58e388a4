//! Summaries of a saved value table

use crate::config::{ActionConfig, GovernorConfig};
use crate::error::Result;
use crate::persistence::{TableLayout, TableStore};
use crate::value_store::ValueTable;
use serde::Serialize;

/// What the greedy policy would do in one visited state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub state: Vec<usize>,
    pub action: usize,
    /// Target frequency for absolute actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub khz: Option<u32>,
    /// Frequency steps moved for relative actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    pub value: f64,
    pub visits: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub path: String,
    pub fingerprint: String,
    pub dims: Vec<usize>,
    pub actions: usize,
    pub cells: usize,
    pub visited_cells: usize,
    pub visited_states: usize,
    /// Fraction of states with at least one visit
    pub coverage: f64,
    pub states: Vec<StateSummary>,
}

/// Load the saved table for `config` and summarize it
pub fn inspect(config: &GovernorConfig) -> Result<TableSummary> {
    config.validate()?;
    let store = TableStore::from_config(config);
    let table = store.load()?;
    summarize(&table, store.layout(), store.path().display().to_string())
}

pub fn summarize(table: &ValueTable, layout: &TableLayout, path: String) -> Result<TableSummary> {
    let mut states = Vec::new();
    for n in 0..table.state_count() {
        let state = table.state_at(n);
        let Some(action) = table.greedy_visited(&state)? else {
            continue;
        };
        let (khz, step) = match layout.actions {
            ActionConfig::Absolute => (layout.frequencies.get(action).copied(), None),
            ActionConfig::Relative { steps } => (None, Some(action as i64 - (steps / 2) as i64)),
        };
        states.push(StateSummary {
            action,
            khz,
            step,
            value: table.value(&state, action)?,
            visits: table.visit_row(&state)?.iter().sum(),
            state: state.0,
        });
    }

    let visited_states = states.len();
    Ok(TableSummary {
        path,
        fingerprint: layout.fingerprint(),
        dims: table.dims().to_vec(),
        actions: table.actions(),
        cells: table.cell_count(),
        visited_cells: table.visited_cells(),
        visited_states,
        coverage: visited_states as f64 / table.state_count().max(1) as f64,
        states,
    })
}
