//! Persisted session settings: user-editable calibration
//! values and the ROI list.
//!
//! The document lives next to the image, with the image's
//! path and a `.json` extension:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "thermal_parameters": { "Emissivity": 0.95, "RelativeHumidity": 50.0 },
//!   "rois": [
//!     { "type": "RectROI", "name": "ROI_1", "emissivity": 0.95,
//!       "x": 10, "y": 12, "width": 40, "height": 20 },
//!     { "type": "SpotROI", "name": "Spot_2", "emissivity": 0.9,
//!       "x": 80, "y": 60, "radius": 5 },
//!     { "type": "PolygonROI", "name": "Polygon_3", "emissivity": 0.95,
//!       "points": [[0, 0], [50, 0], [50, 50]] }
//!   ]
//! }
//! ```
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_derive::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    registry::{RoiOptions, RoiRegistry},
    roi::{Polygon, Rectangle, Shape, Spot},
    temperature::{CalibrationParameters, DEFAULT_EMISSIVITY},
};

pub const SETTINGS_VERSION: &str = "1.0";

fn default_emissivity() -> f64 {
    DEFAULT_EMISSIVITY
}
fn default_side() -> f64 {
    50.
}
fn default_radius() -> f64 {
    5.
}
fn default_points() -> Vec<(f64, f64)> {
    vec![(0., 0.), (50., 0.), (50., 50.), (0., 50.)]
}

/// One ROI as persisted. Missing geometry falls back to the
/// same defaults used when the document was hand-edited.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum RoiRecord {
    #[serde(rename = "RectROI")]
    Rectangle {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_emissivity")]
        emissivity: f64,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default = "default_side")]
        width: f64,
        #[serde(default = "default_side")]
        height: f64,
    },
    #[serde(rename = "SpotROI")]
    Spot {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_emissivity")]
        emissivity: f64,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default = "default_radius")]
        radius: f64,
    },
    #[serde(rename = "PolygonROI")]
    Polygon {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_emissivity")]
        emissivity: f64,
        #[serde(default = "default_points")]
        points: Vec<(f64, f64)>,
    },
}

impl RoiRecord {
    pub fn from_parts(name: &str, emissivity: f64, shape: &Shape) -> Self {
        let name = Some(name.to_string());
        match shape.clone() {
            Shape::Rectangle(Rectangle {
                x,
                y,
                width,
                height,
            }) => RoiRecord::Rectangle {
                name,
                emissivity,
                x,
                y,
                width,
                height,
            },
            Shape::Spot(Spot { x, y, radius }) => RoiRecord::Spot {
                name,
                emissivity,
                x,
                y,
                radius,
            },
            Shape::Polygon(Polygon { points }) => RoiRecord::Polygon {
                name,
                emissivity,
                points,
            },
        }
    }

    pub fn into_parts(self) -> (Shape, RoiOptions) {
        let (shape, name, emissivity) = match self {
            RoiRecord::Rectangle {
                name,
                emissivity,
                x,
                y,
                width,
                height,
            } => (
                Shape::Rectangle(Rectangle {
                    x,
                    y,
                    width,
                    height,
                }),
                name,
                emissivity,
            ),
            RoiRecord::Spot {
                name,
                emissivity,
                x,
                y,
                radius,
            } => (Shape::Spot(Spot { x, y, radius }), name, emissivity),
            RoiRecord::Polygon {
                name,
                emissivity,
                points,
            } => (Shape::Polygon(Polygon { points }), name, emissivity),
        };
        (
            shape,
            RoiOptions {
                name,
                emissivity: Some(emissivity),
            },
        )
    }
}

/// Per-ROI report including computed statistics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetailedRoiRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub emissivity: f64,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_mean: Option<f64>,
    pub temp_median: Option<f64>,
    pub temp_std: Option<f64>,
    pub pixel_count: usize,
}

fn record_type(shape: &Shape) -> &'static str {
    match shape {
        Shape::Rectangle(_) => "RectROI",
        Shape::Spot(_) => "SpotROI",
        Shape::Polygon(_) => "PolygonROI",
    }
}

impl RoiRegistry {
    /// Serializable ROI list, in registry order.
    pub fn export_rois(&self) -> Vec<RoiRecord> {
        self.rois()
            .iter()
            .map(|roi| RoiRecord::from_parts(&roi.name, roi.emissivity, &roi.shape))
            .collect()
    }

    /// Create a ROI for every record; returns how many were
    /// created.
    pub fn import_rois(&mut self, records: Vec<RoiRecord>) -> usize {
        let count = records.len();
        for record in records {
            let (shape, opts) = record.into_parts();
            match shape {
                Shape::Rectangle(r) => self.create_rectangle(r, opts),
                Shape::Spot(s) => self.create_spot(s, opts),
                Shape::Polygon(p) => self.create_polygon(p, opts),
            };
        }
        count
    }

    /// Like [`import_rois`](RoiRegistry::import_rois), but
    /// from untyped JSON values. Malformed entries are logged
    /// and skipped.
    pub fn import_values(&mut self, values: &[Value]) -> usize {
        let records = values
            .iter()
            .enumerate()
            .filter_map(|(idx, val)| match serde_json::from_value(val.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("skipping roi record #{}: {}", idx, e);
                    None
                }
            })
            .collect();
        self.import_rois(records)
    }

    pub fn export_detailed(&self) -> Vec<DetailedRoiRecord> {
        self.rois()
            .iter()
            .map(|roi| {
                let stats = roi.statistics();
                DetailedRoiRecord {
                    name: roi.name.clone(),
                    kind: record_type(&roi.shape).into(),
                    emissivity: roi.emissivity,
                    temp_min: stats.map(|s| s.min),
                    temp_max: stats.map(|s| s.max),
                    temp_mean: stats.map(|s| s.mean),
                    temp_median: stats.map(|s| s.median),
                    temp_std: stats.map(|s| s.std),
                    pixel_count: self.pixel_count(roi.id()).unwrap_or(0),
                }
            })
            .collect()
    }
}

/// The persisted settings document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub thermal_parameters: HashMap<String, Value>,
    #[serde(default)]
    pub rois: Vec<Value>,
}

fn default_version() -> String {
    SETTINGS_VERSION.into()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            version: default_version(),
            thermal_parameters: HashMap::new(),
            rois: vec![],
        }
    }
}

impl Settings {
    /// Snapshot the user-editable parameters and the ROIs.
    pub fn capture(registry: &RoiRegistry) -> Result<Self> {
        let params = registry.engine().parameters().to_map();
        let thermal_parameters = CalibrationParameters::USER_KEYS
            .iter()
            .filter_map(|&key| {
                let val = *params.get(key)?;
                serde_json::Number::from_f64(val).map(|n| (key.to_string(), Value::Number(n)))
            })
            .collect();
        let rois = registry
            .export_rois()
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?;
        Ok(Settings {
            version: default_version(),
            thermal_parameters,
            rois,
        })
    }

    /// User-editable parameters that are present and
    /// numeric. Anything else keeps its previous value.
    pub fn user_parameters(&self) -> HashMap<String, f64> {
        CalibrationParameters::USER_KEYS
            .iter()
            .filter_map(|&key| {
                let val = match self.thermal_parameters.get(key)? {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                match val {
                    Some(v) if v.is_finite() => Some((key.to_string(), v)),
                    _ => {
                        warn!("ignoring invalid setting `{}`", key);
                        None
                    }
                }
            })
            .collect()
    }

    /// Overlay the persisted parameters on `base`.
    pub fn calibration(&self, base: &CalibrationParameters) -> CalibrationParameters {
        CalibrationParameters::from_map(&self.user_parameters(), base)
    }

    /// Path of the settings document for an image.
    pub fn path_for_image(image: &Path) -> PathBuf {
        image.with_extension("json")
    }

    /// Read settings from `path`; `None` if the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let settings = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing settings {}", path.display()))?;
        info!("settings loaded from {}", path.display());
        Ok(Some(settings))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!("settings saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::ThermalEngine, raw::RawThermalFrame, temperature::tests::flir_params};
    use ndarray::Array2;
    use serde_json::json;

    fn registry() -> RoiRegistry {
        let mut registry = RoiRegistry::new(ThermalEngine::new(flir_params()));
        let frame = Array2::from_shape_fn((30, 30), |(r, c)| 15000 + 10 * (r + c) as u16);
        registry
            .load_frame(RawThermalFrame::from_array(frame))
            .unwrap();
        registry
    }

    #[test]
    fn records_use_settings_type_names() -> Result<()> {
        let record = RoiRecord::from_parts(
            "a",
            0.9,
            &Shape::Spot(Spot {
                x: 1.,
                y: 2.,
                radius: 3.,
            }),
        );
        let val = serde_json::to_value(&record)?;
        assert_eq!(
            val,
            json!({"type": "SpotROI", "name": "a", "emissivity": 0.9, "x": 1.0, "y": 2.0, "radius": 3.0})
        );
        Ok(())
    }

    #[test]
    fn missing_geometry_uses_defaults() -> Result<()> {
        let record: RoiRecord = serde_json::from_value(json!({"type": "RectROI"}))?;
        assert_eq!(
            record,
            RoiRecord::Rectangle {
                name: None,
                emissivity: 0.95,
                x: 0.,
                y: 0.,
                width: 50.,
                height: 50.,
            }
        );
        let record: RoiRecord = serde_json::from_value(json!({"type": "PolygonROI"}))?;
        assert!(matches!(record, RoiRecord::Polygon { ref points, .. } if points.len() == 4));
        Ok(())
    }

    #[test]
    fn import_skips_malformed_entries() {
        let mut registry = registry();
        let values = vec![
            json!({"type": "SpotROI", "x": 5, "y": 5, "radius": 2}),
            json!({"type": "Ellipse", "x": 1}),
            json!({"type": "RectROI", "x": "left"}),
            json!({"type": "PolygonROI", "name": "tri", "points": [[0, 0], [9, 0], [0, 9]]}),
        ];
        assert_eq!(registry.import_values(&values), 2);
        assert_eq!(registry.rois()[1].name, "tri");
    }

    #[test]
    fn detailed_export_reports_statistics() {
        let mut registry = registry();
        registry.import_rois(vec![
            RoiRecord::Rectangle {
                name: Some("inside".into()),
                emissivity: 0.95,
                x: 0.,
                y: 0.,
                width: 3.,
                height: 2.,
            },
            RoiRecord::Rectangle {
                name: Some("outside".into()),
                emissivity: 0.95,
                x: 100.,
                y: 0.,
                width: 3.,
                height: 2.,
            },
        ]);
        let detailed = registry.export_detailed();
        assert_eq!(detailed[0].pixel_count, 6);
        assert_eq!(detailed[0].kind, "RectROI");
        assert!(detailed[0].temp_median.is_some());
        assert_eq!(detailed[1].pixel_count, 0);
        assert!(detailed[1].temp_min.is_none() && detailed[1].temp_std.is_none());
    }

    #[test]
    fn invalid_parameters_are_ignored() {
        let settings: Settings = serde_json::from_value(json!({
            "thermal_parameters": {
                "Emissivity": 0.8,
                "RelativeHumidity": "bad",
                "AtmosphericTemperature": "25.5",
                "PlanckB": 1.0
            }
        }))
        .unwrap();
        assert_eq!(settings.version, SETTINGS_VERSION);
        let params = settings.calibration(&flir_params());
        assert_eq!(params.emissivity, 0.8);
        assert_eq!(params.relative_humidity, 50.);
        assert_eq!(params.atmospheric_temperature, 25.5);
        assert_eq!(params.planck_b, flir_params().planck_b);
    }

    #[test]
    fn settings_path_sits_next_to_image() {
        assert_eq!(
            Settings::path_for_image(Path::new("/data/flight/IR_0042.jpg")),
            PathBuf::from("/data/flight/IR_0042.json")
        );
    }
}
