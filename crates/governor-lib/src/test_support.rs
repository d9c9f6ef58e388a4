//! Scripted platform shared by the unit tests

use crate::error::{GovernorError, Result};
use crate::sensing::Platform;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Platform with fixed counter readings and recorded frequency writes
pub struct MockPlatform {
    counters: Mutex<HashMap<String, f64>>,
    temperatures: Mutex<Vec<f64>>,
    power: f64,
    frequency: AtomicU32,
    /// Frequency the platform snaps requests to, if any
    clamp_to: Option<u32>,
    writes: Mutex<Vec<u32>>,
    pub prepared: AtomicBool,
    pub released: AtomicBool,
    pub counter_reads: AtomicUsize,
    fail_counters: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockPlatform {
    pub fn new(frequency: u32) -> Self {
        let counters = [
            ("cycles", 2.0e7),
            ("instructions_retired", 3.0e7),
            ("l2_data_refills", 3.0e4),
            ("branch_mispredictions", 1.5e4),
            ("data_memory_accesses", 6.0e6),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            counters: Mutex::new(counters),
            temperatures: Mutex::new(vec![48.0, 47.0, 49.0, 46.0]),
            power: 1.5,
            frequency: AtomicU32::new(frequency),
            clamp_to: None,
            writes: Mutex::new(Vec::new()),
            prepared: AtomicBool::new(false),
            released: AtomicBool::new(false),
            counter_reads: AtomicUsize::new(0),
            fail_counters: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Every write lands on `khz` regardless of the request
    pub fn clamping_to(mut self, khz: u32) -> Self {
        self.clamp_to = Some(khz);
        self
    }

    pub fn set_counter(&self, name: &str, value: f64) {
        self.counters.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn set_temperatures(&self, temps: Vec<f64>) {
        *self.temperatures.lock().unwrap() = temps;
    }

    pub fn fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<u32> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn prepare(&self, _cluster: usize) -> Result<()> {
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, _cluster: usize) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_counter(&self, _core: usize, name: &str) -> Result<f64> {
        self.counter_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(GovernorError::Sensing(format!("{} unavailable", name)));
        }
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| GovernorError::Sensing(format!("no counter {}", name)))
    }

    async fn read_temperatures(&self) -> Result<Vec<f64>> {
        Ok(self.temperatures.lock().unwrap().clone())
    }

    async fn read_power(&self) -> Result<f64> {
        Ok(self.power)
    }

    async fn get_frequency(&self, _cluster: usize) -> Result<u32> {
        Ok(self.frequency.load(Ordering::SeqCst))
    }

    async fn set_frequency(&self, _cluster: usize, khz: u32) -> Result<()> {
        self.writes.lock().unwrap().push(khz);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GovernorError::Actuation("write rejected".to_string()));
        }
        self.frequency
            .store(self.clamp_to.unwrap_or(khz), Ordering::SeqCst);
        Ok(())
    }
}
