//! Governor configuration loading

use anyhow::{Context, Result};
use governor_lib::config::GovernorConfig;
use std::path::Path;

/// Load configuration from an optional file and `GOVERNOR_*` environment overrides
///
/// Nested keys use a double underscore, e.g. `GOVERNOR_CONTROLLER__PERIOD_MS=100`.
pub fn load(path: Option<&Path>) -> Result<GovernorConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("GOVERNOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read configuration")?;

    let governor: GovernorConfig = config
        .try_deserialize()
        .context("invalid configuration")?;
    governor.validate().context("configuration rejected")?;
    Ok(governor)
}
