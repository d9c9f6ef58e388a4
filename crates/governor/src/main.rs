//! RL Governor - reinforcement-learning DVFS governor
//!
//! Runs on the target board, learning (or exploiting) a frequency policy for
//! one CPU cluster from hardware counters, temperatures and power.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use governor_lib::{
    config::GovernorConfig,
    controller::{ControlLoopBuilder, Mode},
    health::HealthRegistry,
    inspect::{inspect, TableSummary},
    profiler::Profiler,
    sensing::{Platform, SysfsPlatform},
};
use rl_governor::{
    api, config,
    signal::{shutdown_signal, supervise},
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Reinforcement-learning DVFS governor
#[derive(Parser)]
#[command(name = "rl-governor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, env = "GOVERNOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Explore and learn, checkpointing the value table
    Train {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Exploit a saved value table without learning
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Sample the state space without changing the frequency
    Profile {
        /// Stop after this many samples
        #[arg(long)]
        samples: Option<u64>,
    },

    /// Summarize a saved value table
    Inspect {
        #[arg(long, short, default_value = "table")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Train { ticks } => control(config, Mode::Train, ticks).await,
        Command::Run { ticks } => control(config, Mode::Run, ticks).await,
        Command::Profile { samples } => profile(config, samples).await,
        Command::Inspect { format } => print_summary(&config, format),
    }
}

/// Logs go to stderr so inspect output stays clean on stdout
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn control(config: GovernorConfig, mode: Mode, ticks: Option<u64>) -> Result<()> {
    info!(mode = mode.as_str(), cluster = config.controller.cluster, "Starting rl-governor");

    let health = HealthRegistry::for_period(config.period());
    health.register_all().await;

    if config.api.port != 0 {
        let (port, health) = (config.api.port, health.clone());
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, health).await {
                warn!(error = %e, "API server stopped");
            }
        });
    }

    let platform: Arc<dyn Platform> = Arc::new(SysfsPlatform::new(&config.platform));
    let mut builder = ControlLoopBuilder::new(config)
        .mode(mode)
        .platform(platform)
        .health(health);
    if let Some(ticks) = ticks {
        builder = builder.max_ticks(ticks);
    }
    let control = builder.build().context("failed to start the control loop")?;

    let signal = shutdown_signal()?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(control.run(shutdown_rx));

    let summary = supervise(handle, shutdown_tx, signal)
        .await?
        .context("control loop failed")?;
    info!(
        ticks = summary.ticks,
        skipped = summary.skipped,
        deadline_misses = summary.deadline_misses,
        saved_to = ?summary.saved_to,
        "Governor stopped"
    );
    Ok(())
}

async fn profile(config: GovernorConfig, samples: Option<u64>) -> Result<()> {
    let platform: Arc<dyn Platform> = Arc::new(SysfsPlatform::new(&config.platform));
    let mut profiler = Profiler::new(platform, &config).context("failed to start profiling")?;
    if let Some(samples) = samples {
        profiler = profiler.max_samples(samples);
    }
    let path = profiler.path().clone();

    let signal = shutdown_signal()?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(profiler.run(shutdown_rx));

    let profile = supervise(handle, shutdown_tx, signal)
        .await?
        .context("profiling failed")?;
    info!(path = %path.display(), samples = profile.samples, "Profiling finished");
    Ok(())
}

#[derive(Tabled)]
struct StateRow {
    state: String,
    action: usize,
    target: String,
    value: String,
    visits: u64,
}

fn print_summary(config: &GovernorConfig, format: OutputFormat) -> Result<()> {
    let summary: TableSummary = inspect(config).context("failed to load value table")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            println!("table:          {}", summary.path);
            println!("dimensions:     {:?} x {} actions", summary.dims, summary.actions);
            println!(
                "visited cells:  {} / {}",
                summary.visited_cells, summary.cells
            );
            println!(
                "visited states: {} ({:.1}%)",
                summary.visited_states,
                summary.coverage * 100.0
            );

            if summary.states.is_empty() {
                println!("No visited states");
                return Ok(());
            }

            let rows: Vec<StateRow> = summary
                .states
                .iter()
                .map(|s| StateRow {
                    state: format!("{:?}", s.state),
                    action: s.action,
                    target: match (s.khz, s.step) {
                        (Some(khz), _) => format!("{} MHz", khz / 1000),
                        (None, Some(step)) => format!("{:+} steps", step),
                        (None, None) => "-".to_string(),
                    },
                    value: format!("{:.3}", s.value),
                    visits: s.visits,
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
    }
    Ok(())
}
