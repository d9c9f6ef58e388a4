//! State scaling
//!
//! Maps raw metric readings onto continuous bucket coordinates. Readings
//! outside the configured bounds are saturated, never rejected; log-scaled
//! metrics are transformed after clipping so their bucket widths are uniform
//! in log space.

use crate::config::MetricBounds;
use crate::error::{GovernorError, Result};
use crate::models::MetricSnapshot;

/// Precomputed per-metric transform
#[derive(Debug, Clone)]
struct AxisScale {
    label: String,
    min: f64,
    max: f64,
    log_scale: bool,
    scaled_min: f64,
    width: f64,
}

impl AxisScale {
    fn new(bounds: &MetricBounds) -> Self {
        let (scaled_min, scaled_max) = if bounds.log_scale {
            (bounds.min.ln(), bounds.max.ln())
        } else {
            (bounds.min, bounds.max)
        };
        Self {
            label: bounds.label.clone(),
            min: bounds.min,
            max: bounds.max,
            log_scale: bounds.log_scale,
            scaled_min,
            width: (scaled_max - scaled_min) / bounds.buckets as f64,
        }
    }

    fn apply(&self, raw: f64) -> f64 {
        let clipped = raw.clamp(self.min, self.max);
        let value = if self.log_scale { clipped.ln() } else { clipped };
        (value - self.scaled_min) / self.width
    }
}

/// Scales raw snapshots into continuous bucket coordinates
#[derive(Debug, Clone)]
pub struct StateScaler {
    axes: Vec<AxisScale>,
}

impl StateScaler {
    /// Build from validated bounds
    pub fn new(metrics: &[MetricBounds]) -> Self {
        Self {
            axes: metrics.iter().map(AxisScale::new).collect(),
        }
    }

    /// One coordinate per configured metric, in configured order
    pub fn scale(&self, raw: &MetricSnapshot) -> Result<Vec<f64>> {
        self.axes
            .iter()
            .map(|axis| {
                let value = raw.get(&axis.label).ok_or_else(|| {
                    GovernorError::Sensing(format!("snapshot has no '{}' reading", axis.label))
                })?;
                if value.is_nan() {
                    return Err(GovernorError::Sensing(format!(
                        "'{}' reading is not a number",
                        axis.label
                    )));
                }
                Ok(axis.apply(value))
            })
            .collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|a| a.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}
