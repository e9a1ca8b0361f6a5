//! Prediction and inference
//!
//! Run trained models over whole datasets and collect their outputs.

pub mod inference;

pub use inference::{PredictionReport, Predictor};
