//! Reinforcement-learning DVFS governor library
//!
//! This crate provides the core functionality for:
//! - Sampling hardware counters, temperatures and power per cluster
//! - Scaling and discretizing metrics into a state vector
//! - Learning action values with one-step, lambda-return or neighborhood rules
//! - Epsilon-greedy frequency selection and the periodic control loop
//! - Value table persistence, profiling and health checks

pub mod actions;
pub mod config;
pub mod controller;
pub mod discretizer;
pub mod error;
pub mod health;
pub mod inspect;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod policy;
pub mod profiler;
pub mod reward;
pub mod scaling;
pub mod sensing;
pub mod value_store;

#[cfg(test)]
mod test_support;

pub use config::GovernorConfig;
pub use controller::{ControlLoop, ControlLoopBuilder, Mode, Phase, RunSummary, TickReport};
pub use error::{GovernorError, PersistenceError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GovernorMetrics, StructuredLogger};
pub use sensing::{Platform, Sampler, SysfsPlatform};
