//! Periodic sense, decide, actuate and learn loop

mod r#loop;

pub use r#loop::{ControlLoop, ControlLoopBuilder, RunSummary, TickReport};
pub(crate) use r#loop::deadline_missed;

use serde::Serialize;

/// What the loop is allowed to do with the value table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Explore, learn and checkpoint
    Train,
    /// Exploit a saved table; never learns and never writes it
    Run,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Run => "run",
        }
    }

    pub fn learns(&self) -> bool {
        matches!(self, Mode::Train)
    }
}

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    /// Prepared, no transition recorded yet
    WaitFirstSample,
    Running,
    Persist,
    Stopped,
}
