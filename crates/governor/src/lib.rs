//! Process-level pieces of the `rl-governor` binary

pub mod api;
pub mod config;
pub mod signal;
