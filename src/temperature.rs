//! Functions to compute temperature from raw sensor values.
//!
//! The inversion follows the single-reflection form of the
//! Planck radiance model used by [Thermimage R library] and
//! [read_thermal.py]: the reflected ambient radiance is
//! removed from the raw count according to the emissivity,
//! and the remaining object radiance is inverted through the
//! camera's Planck constants.
//!
//! [read_thermal.py]: //github.com/Nervengift/read_thermal.py/blob/master/flir_image_extractor.py
//! [Thermimage R library]: //github.com/gtatters/Thermimage/blob/master/R/raw2temp.R
use std::collections::HashMap;

use ndarray::{ArrayView2, Zip};
use serde_derive::*;
use tracing::debug;

use crate::{
    error::{Result, ThermalError},
    field::TemperatureField,
};

pub const CELSIUS_OFFSET: f64 = 273.15;
pub const DEFAULT_EMISSIVITY: f64 = 0.95;

/// Smallest emissivity used as a divisor.
const EMISSIVITY_FLOOR: f64 = 1e-6;

/// Parameters to compute temperatures from raw sensor
/// values.
///
/// This is typically read from the metadata of the image,
/// with the environmental values edited by the user. Keys
/// follow the ExifTool tag names, so the JSON output of
/// `exiftool -j` deserializes directly. Values may be plain
/// numbers or strings with a unit suffix (`"20.0 C"`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct CalibrationParameters {
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub emissivity: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub atmospheric_temperature: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub atmospheric_transmission: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub relative_humidity: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub object_distance: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub reflected_apparent_temperature: f64,

    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub planck_r1: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub planck_r2: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub planck_b: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub planck_f: f64,
    #[serde(deserialize_with = "serde_helpers::float_with_suffix")]
    pub planck_o: f64,
}

impl Default for CalibrationParameters {
    /// Documented environmental defaults. The Planck
    /// constants are camera specific and have no default;
    /// they start out as NaN and fail [`validate`].
    ///
    /// [`validate`]: CalibrationParameters::validate
    fn default() -> Self {
        CalibrationParameters {
            emissivity: DEFAULT_EMISSIVITY,
            atmospheric_temperature: 20.0,
            atmospheric_transmission: 0.95,
            relative_humidity: 50.0,
            object_distance: 1.0,
            reflected_apparent_temperature: 20.0,
            planck_r1: f64::NAN,
            planck_r2: f64::NAN,
            planck_b: f64::NAN,
            planck_f: f64::NAN,
            planck_o: f64::NAN,
        }
    }
}

impl CalibrationParameters {
    /// Keys the user may edit and persist alongside ROIs.
    pub const USER_KEYS: [&'static str; 6] = [
        "Emissivity",
        "AtmosphericTemperature",
        "AtmosphericTransmission",
        "RelativeHumidity",
        "ObjectDistance",
        "ReflectedApparentTemperature",
    ];

    fn fields(&self) -> [(&'static str, f64); 11] {
        [
            ("Emissivity", self.emissivity),
            ("AtmosphericTemperature", self.atmospheric_temperature),
            ("AtmosphericTransmission", self.atmospheric_transmission),
            ("RelativeHumidity", self.relative_humidity),
            ("ObjectDistance", self.object_distance),
            ("ReflectedApparentTemperature", self.reflected_apparent_temperature),
            ("PlanckR1", self.planck_r1),
            ("PlanckR2", self.planck_r2),
            ("PlanckB", self.planck_b),
            ("PlanckF", self.planck_f),
            ("PlanckO", self.planck_o),
        ]
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut f64> {
        Some(match key {
            "Emissivity" => &mut self.emissivity,
            "AtmosphericTemperature" => &mut self.atmospheric_temperature,
            "AtmosphericTransmission" => &mut self.atmospheric_transmission,
            "RelativeHumidity" => &mut self.relative_humidity,
            "ObjectDistance" => &mut self.object_distance,
            "ReflectedApparentTemperature" => &mut self.reflected_apparent_temperature,
            "PlanckR1" => &mut self.planck_r1,
            "PlanckR2" => &mut self.planck_r2,
            "PlanckB" => &mut self.planck_b,
            "PlanckF" => &mut self.planck_f,
            "PlanckO" => &mut self.planck_o,
            _ => return None,
        })
    }

    /// Build parameters from a flat key → value map.
    /// Recognized keys override `fallback`; anything else is
    /// ignored.
    pub fn from_map(map: &HashMap<String, f64>, fallback: &CalibrationParameters) -> Self {
        let mut params = fallback.clone();
        for (key, &val) in map {
            if !params.set(key, val) {
                debug!(key = key.as_str(), "ignoring unrecognized calibration key");
            }
        }
        params
    }

    /// Flatten into the same key → value map accepted by
    /// [`from_map`](CalibrationParameters::from_map).
    pub fn to_map(&self) -> HashMap<String, f64> {
        self.fields()
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    pub fn set(&mut self, key: &str, value: f64) -> bool {
        match self.field_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Every parameter must be a finite number, and the
    /// Planck `R2` constant must be non-zero.
    pub fn validate(&self) -> Result<()> {
        for &(key, val) in self.fields().iter() {
            if !val.is_finite() {
                return Err(ThermalError::InvalidCalibration {
                    key,
                    reason: format!("expected a finite number, found {}", val),
                });
            }
        }
        if self.planck_r2 == 0. {
            return Err(ThermalError::InvalidCalibration {
                key: "PlanckR2",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    // raw = PR1/(PR2*(exp(PB/(temp+273.15))-PF))-PO
    pub fn planck_temp_to_raw(&self, temp: f64) -> f64 {
        self.planck_r1
            / (self.planck_r2 * ((self.planck_b / (temp + CELSIUS_OFFSET)).exp() - self.planck_f))
            - self.planck_o
    }

    /// Per-pixel transform from raw count to degrees Celsius
    /// for the given emissivity. Returns NaN wherever the
    /// logarithm's argument is not positive.
    pub fn temperature_transform(&self, emissivity: f64) -> impl Fn(f64) -> f64 + Send + Sync {
        let raw_reflected = self.planck_temp_to_raw(self.reflected_apparent_temperature);
        let reflected_part = (1. - emissivity) * raw_reflected;
        let divisor = emissivity.max(EMISSIVITY_FLOOR);

        let (r1, r2, b, f, o) = (
            self.planck_r1,
            self.planck_r2,
            self.planck_b,
            self.planck_f,
            self.planck_o,
        );

        move |raw| {
            let raw_object = (raw - reflected_part) / divisor;
            let log_arg = r1 / (r2 * (raw_object + o)) + f;
            if log_arg > 0. {
                let temp = b / log_arg.ln() - CELSIUS_OFFSET;
                if temp.is_finite() {
                    return temp;
                }
            }
            f64::NAN
        }
    }

    pub fn raw_to_temp(&self, raw: f64) -> f64 {
        self.temperature_transform(self.emissivity)(raw)
    }

    /// Small additive correction for atmospheric
    /// conditions, relative to a 20 °C / 50 % reference.
    pub fn environmental_offset(&self) -> f64 {
        (self.atmospheric_temperature - 20.0) * 0.0005
            + (1.0 - self.atmospheric_transmission) * 0.002
            + (self.relative_humidity - 50.0) * 0.00002
    }

    /// Convert a full raw grid with the global emissivity.
    pub fn convert(&self, raw: ArrayView2<u16>) -> Result<TemperatureField> {
        self.convert_with_emissivity(raw, self.emissivity)
    }

    /// Convert a full raw grid with an explicit emissivity.
    ///
    /// Invalid parameters abort the whole conversion; no
    /// partially converted field is ever returned.
    pub fn convert_with_emissivity(
        &self,
        raw: ArrayView2<u16>,
        emissivity: f64,
    ) -> Result<TemperatureField> {
        self.validate()?;
        let temp_t = self.temperature_transform(emissivity);
        let values = Zip::from(&raw).par_map_collect(|&count| temp_t(count as f64));
        Ok(TemperatureField::new(values))
    }
}

mod serde_helpers {
    use lazy_static::lazy_static;
    use regex::Regex;
    use serde::*;
    use serde_derive::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Str(String),
    }

    pub fn float_with_suffix<'de, D>(de: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^\s*[-+]?(\d+\.?\d*|\.\d+)([eE][-+]?\d+)?").unwrap();
        }

        use serde::de::Error;
        let str_rep = match NumberOrString::deserialize(de)? {
            NumberOrString::Number(val) => return Ok(val),
            NumberOrString::Str(s) => s,
        };
        let val = RE
            .find(&str_rep)
            .ok_or_else(|| Error::custom("unexpected format: must begin with float"))?
            .as_str()
            .trim()
            .parse()
            .map_err(Error::custom)?;

        Ok(val)
    }
}
