//! Error taxonomy for the governor
//!
//! Configuration and invariant errors are fatal. Sensing errors skip a tick,
//! actuation errors are logged, and persistence errors let the caller decide
//! between a fresh table and an exit.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, GovernorError>;

#[derive(Debug, Error)]
pub enum GovernorError {
    /// Invalid configuration detected at startup
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A frequency read from the platform is not in the configured list
    #[error("frequency {khz} kHz is not one of the configured frequencies")]
    UnknownFrequency { khz: u32 },

    /// The table would not fit the configured state-space budget
    #[error("state space of {cells} cells exceeds the limit of {limit}")]
    StateSpaceTooLarge { cells: usize, limit: usize },

    /// A sensor or counter read failed
    #[error("sensing failed: {0}")]
    Sensing(String),

    /// The platform rejected a frequency write
    #[error("actuation failed: {0}")]
    Actuation(String),

    /// An index or action fell outside the table
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl GovernorError {
    /// Errors after which the control loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GovernorError::Config(_)
                | GovernorError::UnknownFrequency { .. }
                | GovernorError::StateSpaceTooLarge { .. }
                | GovernorError::Invariant(_)
        )
    }

    /// Short machine-friendly kind for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            GovernorError::Config(_) => "config",
            GovernorError::UnknownFrequency { .. } => "unknown_frequency",
            GovernorError::StateSpaceTooLarge { .. } => "state_space",
            GovernorError::Sensing(_) => "sensing",
            GovernorError::Actuation(_) => "actuation",
            GovernorError::Invariant(_) => "invariant",
            GovernorError::Persistence(_) => "persistence",
        }
    }
}

/// Failures loading or saving a value table
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no saved table at {path}")]
    NotFound { path: String },

    /// The saved table was trained under a different layout
    #[error("saved table layout {found} does not match expected layout {expected}")]
    ShapeMismatch { expected: String, found: String },

    #[error("saved table is corrupt: {0}")]
    Corrupt(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GovernorError::Config("bad".into()).is_fatal());
        assert!(GovernorError::UnknownFrequency { khz: 250_000 }.is_fatal());
        assert!(GovernorError::Invariant("oob".into()).is_fatal());
        assert!(!GovernorError::Sensing("eio".into()).is_fatal());
        assert!(!GovernorError::Actuation("eperm".into()).is_fatal());
    }

    #[test]
    fn test_persistence_error_converts() {
        let err: GovernorError = PersistenceError::NotFound {
            path: "/tmp/q.json".into(),
        }
        .into();
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("/tmp/q.json"));
    }
}
