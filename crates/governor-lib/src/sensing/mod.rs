//! Sensing and actuation
//!
//! The control loop only talks to hardware through [`Platform`]. The sysfs
//! implementation reads the per-core counter module, cpufreq and the thermal
//! zones; tests substitute a scripted platform.

mod sampler;
mod sysfs;


pub use sampler::Sampler;
pub use sysfs::SysfsPlatform;

use crate::error::Result;
use async_trait::async_trait;

/// Hardware access used by the governor
#[async_trait]
pub trait Platform: Send + Sync {
    /// One-time setup before the first tick, such as taking over the
    /// cluster's frequency governor
    async fn prepare(&self, cluster: usize) -> Result<()>;

    /// Undo whatever `prepare` changed
    async fn release(&self, _cluster: usize) -> Result<()> {
        Ok(())
    }

    /// Counter value accumulated over the last period
    async fn read_counter(&self, core: usize, name: &str) -> Result<f64>;

    /// All thermal sensors, in Celsius
    async fn read_temperatures(&self) -> Result<Vec<f64>>;

    /// Cluster power in watts
    async fn read_power(&self) -> Result<f64>;

    /// Frequency currently in effect, in kHz
    async fn get_frequency(&self, cluster: usize) -> Result<u32>;

    /// Request a frequency; the platform may round it to a supported step
    async fn set_frequency(&self, cluster: usize, khz: u32) -> Result<()>;
}
