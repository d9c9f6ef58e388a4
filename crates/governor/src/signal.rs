//! Termination signals
//!
//! Both SIGINT and SIGTERM stop the control loop through its broadcast
//! shutdown channel, so the table is persisted and the cluster handed back
//! however the process is asked to exit.

use anyhow::{Context, Result};
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM
///
/// Handlers are installed before this returns; a signal arriving before the
/// future is polled is still delivered.
pub fn shutdown_signal() -> Result<impl Future<Output = Signal>> {
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => Signal::Interrupt,
            _ = terminate.recv() => Signal::Terminate,
        }
    })
}

/// Wait for `task`, broadcasting shutdown to it when `signal` fires first
pub async fn supervise<T>(
    mut task: JoinHandle<T>,
    shutdown: broadcast::Sender<()>,
    signal: impl Future<Output = Signal>,
) -> Result<T> {
    tokio::select! {
        joined = &mut task => joined.context("task panicked"),
        received = signal => {
            info!(signal = received.as_str(), "Shutdown requested");
            let _ = shutdown.send(());
            task.await.context("task panicked")
        }
    }
}
