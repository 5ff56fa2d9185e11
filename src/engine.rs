//! Owner of the raw frame, the calibration snapshot and the
//! temperature field derived from them.
use ndarray::{s, Zip};
use tracing::{debug, warn};

use crate::{
    error::{Result, ThermalError},
    field::TemperatureField,
    raw::RawThermalFrame,
    roi::Mask,
    temperature::CalibrationParameters,
};

/// Keeps the temperature field in sync with the loaded frame
/// and parameters. The field is recomputed wholesale on every
/// change and never edited in place.
#[derive(Debug, Clone)]
pub struct ThermalEngine {
    frame: Option<RawThermalFrame>,
    params: CalibrationParameters,
    field: Option<TemperatureField>,
    environmental_correction: bool,
}

impl ThermalEngine {
    pub fn new(params: CalibrationParameters) -> Self {
        ThermalEngine {
            frame: None,
            params,
            field: None,
            environmental_correction: false,
        }
    }

    pub fn frame(&self) -> Option<&RawThermalFrame> {
        self.frame.as_ref()
    }

    pub fn parameters(&self) -> &CalibrationParameters {
        &self.params
    }

    pub fn field(&self) -> Option<&TemperatureField> {
        self.field.as_ref()
    }

    pub fn environmental_correction(&self) -> bool {
        self.environmental_correction
    }

    /// Load a frame and convert it with the current
    /// parameters.
    pub fn load_frame(&mut self, frame: RawThermalFrame) -> Result<()> {
        self.frame = Some(frame);
        self.calculate_temperatures()
    }

    pub fn set_parameters(&mut self, params: CalibrationParameters) -> Result<()> {
        self.params = params;
        self.calculate_temperatures()
    }

    pub fn set_environmental_correction(&mut self, enabled: bool) -> Result<()> {
        self.environmental_correction = enabled;
        self.calculate_temperatures()
    }

    /// Recompute the field from the frame. On invalid
    /// calibration the field becomes all-missing and the
    /// error is returned to the caller.
    pub fn calculate_temperatures(&mut self) -> Result<()> {
        let frame = match &self.frame {
            Some(frame) => frame,
            None => return Ok(()),
        };

        match self.params.convert(frame.counts()) {
            Ok(field) => {
                let field = self.corrected(field);
                debug!(range = ?field.range(), "temperature field updated");
                self.field = Some(field);
                Ok(())
            }
            Err(e) => {
                let (wid, ht) = frame.dim();
                warn!("temperature conversion rejected: {}", e);
                self.field = Some(TemperatureField::missing(wid, ht));
                Err(e)
            }
        }
    }

    fn corrected(&self, field: TemperatureField) -> TemperatureField {
        if !self.environmental_correction || field.is_all_missing() {
            return field;
        }
        field.offset(self.params.environmental_offset())
    }

    /// Temperature at `(x, y)`; NaN outside the image or
    /// before anything was loaded.
    pub fn temperature_at(&self, x: usize, y: usize) -> f64 {
        self.field
            .as_ref()
            .map(|f| f.temperature_at(x, y))
            .unwrap_or(f64::NAN)
    }

    /// Reconvert the raw counts under `mask` with a specific
    /// emissivity, leaving the cached field untouched. Only
    /// the mask's block is visited.
    pub fn roi_temperatures(&self, mask: &Mask, emissivity: f64) -> Result<Vec<f64>> {
        let frame = match &self.frame {
            Some(frame) => frame,
            None => return Ok(vec![]),
        };
        if frame.counts().dim() != mask.view().dim() {
            return Err(ThermalError::ShapeMismatch {
                field: frame.counts().dim(),
                mask: mask.view().dim(),
            });
        }
        self.params.validate()?;

        let temp_t = self.params.temperature_transform(emissivity);
        let offset = if self.environmental_correction {
            self.params.environmental_offset()
        } else {
            0.
        };

        let (rows, cols) = mask.block();
        let counts = frame.counts().slice_move(s![rows.clone(), cols.clone()]);
        let inside = mask.view().slice_move(s![rows, cols]);

        let mut temps = Vec::with_capacity(mask.pixel_count());
        Zip::from(&counts).and(&inside).for_each(|&count, &selected| {
            if selected {
                temps.push(temp_t(count as f64) + offset);
            }
        });
        Ok(temps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        roi::{Mask, Rectangle, Shape, Spot},
        temperature::tests::flir_params,
    };
    use anyhow::Result;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn frame() -> RawThermalFrame {
        RawThermalFrame::from_array(Array2::from_shape_fn((8, 10), |(r, c)| {
            15000 + 40 * (r * 10 + c) as u16
        }))
    }

    #[test]
    fn loading_computes_field() -> Result<()> {
        let mut engine = ThermalEngine::new(flir_params());
        assert!(engine.field().is_none());
        engine.load_frame(frame())?;
        let field = engine.field().unwrap();
        assert_eq!(field.dim(), (10, 8));
        let (lo, hi) = field.range().unwrap();
        assert!(lo < hi);
        assert!(engine.temperature_at(10, 0).is_nan());
        Ok(())
    }

    #[test]
    fn invalid_parameters_give_missing_field() {
        let mut engine = ThermalEngine::new(flir_params());
        let mut params = flir_params();
        params.planck_b = f64::NAN;
        assert!(engine.load_frame(frame()).is_ok());
        let res = engine.set_parameters(params);
        assert!(matches!(res, Err(ThermalError::InvalidCalibration { key: "PlanckB", .. })));
        let field = engine.field().unwrap();
        assert!(field.is_all_missing());
        assert_eq!(field.display_range(), (0., 0.));
    }

    #[test]
    fn roi_reprocessing_uses_own_emissivity() -> Result<()> {
        let mut engine = ThermalEngine::new(flir_params());
        engine.load_frame(frame())?;
        let mask = Shape::from(Rectangle {
            x: 0.,
            y: 0.,
            width: 2.,
            height: 1.,
        })
        .mask(10, 8)?;

        let same = engine.roi_temperatures(&mask, flir_params().emissivity)?;
        assert_eq!(same.len(), 2);
        assert_abs_diff_eq!(same[1], engine.temperature_at(1, 0), epsilon = 1e-12);

        let other = engine.roi_temperatures(&mask, 0.5)?;
        assert!((other[1] - same[1]).abs() > 0.1);
        Ok(())
    }

    #[test]
    fn environmental_correction_shifts_field() -> Result<()> {
        let mut params = flir_params();
        params.atmospheric_temperature = 30.;
        let mut engine = ThermalEngine::new(params.clone());
        engine.load_frame(frame())?;
        let plain = engine.temperature_at(3, 3);
        engine.set_environmental_correction(true)?;
        assert_abs_diff_eq!(
            engine.temperature_at(3, 3) - plain,
            params.environmental_offset(),
            epsilon = 1e-9
        );
        Ok(())
    }

    #[test]
    fn environmental_correction_reaches_roi_reprocessing() -> Result<()> {
        let mut params = flir_params();
        params.atmospheric_temperature = 30.;
        params.relative_humidity = 80.;
        let mut engine = ThermalEngine::new(params.clone());
        engine.load_frame(frame())?;
        let mask = Shape::from(Spot {
            x: 4.,
            y: 3.,
            radius: 1.5,
        })
        .mask(10, 8)?;

        let plain = engine.roi_temperatures(&mask, 0.9)?;
        engine.set_environmental_correction(true)?;
        let corrected = engine.roi_temperatures(&mask, 0.9)?;
        assert_eq!(plain.len(), mask.pixel_count());
        for (p, c) in plain.iter().zip(corrected.iter()) {
            assert_abs_diff_eq!(c - p, params.environmental_offset(), epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn roi_reprocessing_matches_field_inside_block() -> Result<()> {
        let mut engine = ThermalEngine::new(flir_params());
        engine.load_frame(frame())?;
        let mask = Shape::from(Rectangle {
            x: 6.,
            y: 5.,
            width: 3.,
            height: 2.,
        })
        .mask(10, 8)?;
        let temps = engine.roi_temperatures(&mask, flir_params().emissivity)?;
        // row-major over rows 5..7, cols 6..9
        let expected: Vec<_> = (5..7)
            .flat_map(|y| (6..9).map(move |x| (x, y)))
            .map(|(x, y)| engine.temperature_at(x, y))
            .collect();
        assert_eq!(temps.len(), expected.len());
        for (t, e) in temps.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*t, *e, epsilon = 1e-12);
        }

        let wrong = Mask::from_grid(Array2::from_elem((3, 3), true));
        assert!(matches!(
            engine.roi_temperatures(&wrong, 0.9),
            Err(ThermalError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
