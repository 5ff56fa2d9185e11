//! Temperature statistics over masked regions.
//!
//! [`Stats`] is a streaming accumulator (min, max, mean and
//! population variance) that can be fed values with `+=` and
//! merged with other accumulators, so it folds naturally
//! under rayon. [`summarize`] adds the median, which needs
//! all values at once.
use std::{cmp::Ordering, ops::AddAssign};

use ndarray::Zip;
use serde_derive::*;

use crate::{
    error::{Result, ThermalError},
    field::TemperatureField,
    roi::Mask,
};

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    #[serde(skip)]
    m2: f64,
}

impl Stats {
    /// Population variance (divisor `count`).
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl AddAssign<f64> for Stats {
    /// Missing (NaN) values are skipped.
    fn add_assign(&mut self, val: f64) {
        if val.is_nan() {
            return;
        }
        if self.count == 0 {
            self.min = val;
            self.max = val;
        } else {
            self.min = self.min.min(val);
            self.max = self.max.max(val);
        }
        self.count += 1;
        let delta = val - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (val - self.mean);
    }
}

impl AddAssign<&Stats> for Stats {
    fn add_assign(&mut self, other: &Stats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * other.count as f64 / count as f64;
        self.m2 += other.m2 + delta * delta * (self.count * other.count) as f64 / count as f64;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count = count;
    }
}

/// Statistics of one region. Either every field is present
/// or the whole record is absent, so the record is always
/// carried as `Option<TemperatureStats>`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TemperatureStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
}

/// Summarize values, ignoring missing ones. `None` when no
/// value remains.
pub fn summarize<I: IntoIterator<Item = f64>>(values: I) -> Option<TemperatureStats> {
    let mut valid: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }

    let mut stats = Stats::default();
    for &val in valid.iter() {
        stats += val;
    }

    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = valid.len() / 2;
    let median = if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.
    } else {
        valid[mid]
    };

    Some(TemperatureStats {
        min: stats.min,
        max: stats.max,
        mean: stats.mean,
        std: stats.std(),
        median,
    })
}

/// Statistics of `field` over the pixels selected by `mask`.
pub fn aggregate(field: &TemperatureField, mask: &Mask) -> Result<Option<TemperatureStats>> {
    let values = field.values();
    let mask = mask.view();
    if values.dim() != mask.dim() {
        return Err(ThermalError::ShapeMismatch {
            field: values.dim(),
            mask: mask.dim(),
        });
    }

    let mut selected = Vec::new();
    Zip::from(&values).and(&mask).for_each(|&temp, &inside| {
        if inside {
            selected.push(temp);
        }
    });
    Ok(summarize(selected))
}
