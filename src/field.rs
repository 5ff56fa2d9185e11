//! Calibrated temperature grids.
use ndarray::{Array2, ArrayView2};

/// Temperatures in degrees Celsius, row-major with the
/// same shape as the raw frame it was converted from.
/// Missing entries (invalid inversion) are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureField {
    values: Array2<f64>,
}

impl TemperatureField {
    pub fn new(values: Array2<f64>) -> Self {
        TemperatureField { values }
    }

    /// All-missing field, used when the calibration was
    /// rejected.
    pub fn missing(width: usize, height: usize) -> Self {
        TemperatureField {
            values: Array2::from_elem((height, width), f64::NAN),
        }
    }

    pub fn values(&self) -> ArrayView2<f64> {
        self.values.view()
    }

    /// `(width, height)`
    pub fn dim(&self) -> (usize, usize) {
        let (ht, wid) = self.values.dim();
        (wid, ht)
    }

    /// Temperature at pixel `(x, y)`; NaN outside the grid.
    pub fn temperature_at(&self, x: usize, y: usize) -> f64 {
        self.values.get((y, x)).copied().unwrap_or(f64::NAN)
    }

    /// Min and max over finite entries, `None` if there are
    /// none.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Range for presentation code, which expects a number:
    /// an undefined range is reported as `(0, 0)`.
    pub fn display_range(&self) -> (f64, f64) {
        self.range().unwrap_or((0., 0.))
    }

    pub fn offset(self, delta: f64) -> Self {
        TemperatureField {
            values: self.values.mapv_into(|v| v + delta),
        }
    }

    pub fn is_all_missing(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }
}
