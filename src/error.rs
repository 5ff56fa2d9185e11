//! Error kinds surfaced by the library.
//!
//! Degenerate geometry is not an error: it produces a
//! well-formed empty mask. Only calibration problems, shape
//! mismatches and unexpected mask faults show up here.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThermalError {
    #[error("invalid calibration parameter `{key}`: {reason}")]
    InvalidCalibration { key: &'static str, reason: String },

    #[error("raw data size mismatch: expected {expected} bytes, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("grid shape mismatch: field is {field:?}, mask is {mask:?}")]
    ShapeMismatch {
        field: (usize, usize),
        mask: (usize, usize),
    },

    #[error("could not build mask for `{roi}`: {reason}")]
    MaskConstruction { roi: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ThermalError>;
