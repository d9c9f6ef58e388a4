//! Per-tick metric sampling
//!
//! Counters of every monitored core are read concurrently, one task per
//! core, and all tasks are joined before the snapshot is built.

use super::Platform;
use crate::config::{CounterNames, GovernorConfig};
use crate::error::{GovernorError, Result};
use crate::models::{labels, MetricSnapshot};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::trace;

/// Raw counter values for one period
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterTotals {
    pub cycles: f64,
    pub instructions: f64,
    pub l2_refills: f64,
    pub branch_misses: f64,
    pub memory_accesses: f64,
}

impl CounterTotals {
    fn add(&mut self, other: &CounterTotals) {
        self.cycles += other.cycles;
        self.instructions += other.instructions;
        self.l2_refills += other.l2_refills;
        self.branch_misses += other.branch_misses;
        self.memory_accesses += other.memory_accesses;
    }
}

pub struct Sampler {
    platform: Arc<dyn Platform>,
    cluster: usize,
    cores: Vec<usize>,
    temperature_sensors: Vec<usize>,
    counters: CounterNames,
    period_secs: f64,
    khz: Vec<u32>,
    volts: Vec<f64>,
}

impl Sampler {
    pub fn from_config(platform: Arc<dyn Platform>, config: &GovernorConfig) -> Self {
        Self {
            platform,
            cluster: config.controller.cluster,
            cores: config.controller.cores.clone(),
            temperature_sensors: config.controller.temperature_sensors.clone(),
            counters: config.platform.counters.clone(),
            period_secs: config.period_secs(),
            khz: config.frequencies.khz.clone(),
            volts: config.frequencies.volts.clone(),
        }
    }

    /// Take one snapshot of the cluster
    pub async fn sample(&self) -> Result<MetricSnapshot> {
        let khz = self.platform.get_frequency(self.cluster).await?;
        let volt = self
            .khz
            .iter()
            .position(|&f| f == khz)
            .map(|i| self.volts[i])
            .ok_or(GovernorError::UnknownFrequency { khz })?;

        let totals = self.read_cores().await?;

        let temps = self.platform.read_temperatures().await?;
        let temp = self
            .temperature_sensors
            .iter()
            .map(|&i| {
                temps.get(i).copied().ok_or_else(|| {
                    GovernorError::Sensing(format!(
                        "temperature sensor {} missing ({} reported)",
                        i,
                        temps.len()
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);

        let power = self.platform.read_power().await?;

        let readings = Readings {
            totals,
            khz,
            volt,
            temp,
            power,
        };
        Ok(MetricSnapshot::new(derive_metrics(
            &readings,
            self.period_secs,
            self.cores.len(),
        )))
    }

    async fn read_cores(&self) -> Result<CounterTotals> {
        let mut set = JoinSet::new();
        for &core in &self.cores {
            let platform = Arc::clone(&self.platform);
            let names = self.counters.clone();
            set.spawn(async move { read_core(platform.as_ref(), core, &names).await });
        }

        let mut totals = CounterTotals::default();
        while let Some(joined) = set.join_next().await {
            let core_totals = joined
                .map_err(|e| GovernorError::Sensing(format!("core sampling task failed: {}", e)))??;
            totals.add(&core_totals);
        }
        trace!(?totals, "Counters read");
        Ok(totals)
    }
}

async fn read_core(platform: &dyn Platform, core: usize, names: &CounterNames) -> Result<CounterTotals> {
    Ok(CounterTotals {
        cycles: platform.read_counter(core, &names.cycles).await?,
        instructions: platform.read_counter(core, &names.instructions).await?,
        l2_refills: platform.read_counter(core, &names.l2_refills).await?,
        branch_misses: platform.read_counter(core, &names.branch_misses).await?,
        memory_accesses: platform.read_counter(core, &names.memory_accesses).await?,
    })
}

/// Everything read from the platform in one tick
#[derive(Debug, Clone, Copy)]
pub struct Readings {
    pub totals: CounterTotals,
    pub khz: u32,
    pub volt: f64,
    pub temp: f64,
    pub power: f64,
}

/// Derived metric set for one period
pub fn derive_metrics(r: &Readings, period_secs: f64, cores: usize) -> Vec<(String, f64)> {
    let t = &r.totals;
    let cycles_possible = r.khz as f64 * 1000.0 * period_secs * cores as f64;
    let kilo_instructions = t.instructions / 1000.0;

    vec![
        (labels::USAGE.to_string(), ratio(t.cycles, cycles_possible)),
        (labels::IPC_U.to_string(), ratio(t.instructions, t.cycles)),
        (labels::IPC_P.to_string(), ratio(t.instructions, cycles_possible)),
        (labels::IPS.to_string(), ratio(t.instructions, period_secs)),
        (labels::MPKI.to_string(), ratio(t.l2_refills, kilo_instructions)),
        (labels::BMPKI.to_string(), ratio(t.branch_misses, kilo_instructions)),
        (labels::DAPKI.to_string(), ratio(t.memory_accesses, kilo_instructions)),
        (labels::TEMP.to_string(), r.temp),
        (labels::POWER.to_string(), r.power),
        (labels::FREQ.to_string(), r.khz as f64),
        (labels::VOLT.to_string(), r.volt),
    ]
}

/// Division that reports 0 for an empty denominator
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
