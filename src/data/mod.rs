//! Datasets and train/validation splitting
//!
//! Simulated samples are read from .npy arrays and exposed as burn datasets.

pub mod calibration;
pub mod npy;
pub mod shape;
pub mod split;

pub use calibration::{CalibrationDataset, CalibrationSample};
pub use shape::{ShapeDataset, ShapeSample};
pub use split::DataSplit;
