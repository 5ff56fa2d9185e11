//! Temperature analysis of radiometric thermal frames over
//! user-drawn regions of interest.
//!
//! The crate provides:
//!
//! 1. Conversion of raw sensor counts into a per-pixel
//! [temperature] field using the Planck inversion with
//! emissivity and reflected-radiance compensation. The
//! parameters are usually taken from the image metadata
//! (ExifTool-style keys such as `PlanckR1`).
//!
//! 2. [ROI geometry](roi) (rectangles, spots and polygons)
//! rasterized into boolean masks, and [statistics](stats)
//! over the masked pixels.
//!
//! 3. A [registry](registry::RoiRegistry) that keeps ROI
//! statistics current as geometry, emissivity, frames or
//! calibration change, and [persists](settings) ROIs next to
//! the image.
//!
//! # Usage
//!
//! ```rust
//! # fn test_compile() -> anyhow::Result<()> {
//! use std::collections::HashMap;
//! use ndarray::Array2;
//! use thermal_roi::{
//!     CalibrationParameters, RawThermalFrame, RoiRegistry, ThermalEngine,
//!     roi::Spot, registry::RoiOptions,
//! };
//!
//! let mut values = HashMap::new();
//! values.insert("PlanckR1".to_string(), 21106.77);
//! values.insert("PlanckR2".to_string(), 0.012545258);
//! values.insert("PlanckB".to_string(), 1501.);
//! values.insert("PlanckF".to_string(), 1.);
//! values.insert("PlanckO".to_string(), -7340.);
//! let params = CalibrationParameters::from_map(&values, &Default::default());
//!
//! let mut registry = RoiRegistry::new(ThermalEngine::new(params));
//! registry.load_frame(RawThermalFrame::from_array(Array2::from_elem((120, 160), 15000)))?;
//! let spot = registry.create_spot(Spot { x: 80., y: 60., radius: 4. }, RoiOptions::default());
//! println!("{:?}", spot.statistics());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod temperature;
pub mod raw;
pub mod field;
pub mod roi;
pub mod stats;
pub mod engine;
pub mod registry;
pub mod settings;

#[cfg(feature = "cli")]
pub mod cli;

pub use crate::engine::ThermalEngine;
pub use crate::error::ThermalError;
pub use crate::raw::RawThermalFrame;
pub use crate::registry::RoiRegistry;
pub use crate::temperature::CalibrationParameters;
