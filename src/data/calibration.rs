//! Grouped dataset for the calibration network
use burn::data::dataset::Dataset;
use ndarray::Ix2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::npy::read_floats;
use crate::{GalshapeError, Result};

/// One noisy realisation of a calibration case
#[derive(Debug, Clone)]
pub struct CalibrationSample {
    pub input: Vec<f32>,
    pub label: Vec<f32>,
}

/// Metadata from dataset.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationMetadata {
    /// Realisations per case
    pub real_size: usize,
    #[serde(default)]
    pub description: String,
}

/// Cases stored contiguously, each expanded into `real_size` rows
#[derive(Debug, Clone)]
pub struct CalibrationDataset {
    samples: Vec<CalibrationSample>,
    real_size: usize,
    input_dim: usize,
    label_dim: usize,
}

impl CalibrationDataset {
    pub fn new(samples: Vec<CalibrationSample>, real_size: usize) -> Result<Self> {
        if real_size == 0 {
            return Err(GalshapeError::Data("real_size must be > 0".to_string()));
        }
        if samples.len() % real_size != 0 {
            return Err(GalshapeError::Data(format!(
                "{} rows do not form whole cases of {}",
                samples.len(),
                real_size
            )));
        }

        let input_dim = samples.first().map(|s| s.input.len()).unwrap_or(0);
        let label_dim = samples.first().map(|s| s.label.len()).unwrap_or(0);
        if samples
            .iter()
            .any(|s| s.input.len() != input_dim || s.label.len() != label_dim)
        {
            return Err(GalshapeError::Data(
                "calibration rows have inconsistent widths".to_string(),
            ));
        }

        Ok(CalibrationDataset {
            samples,
            real_size,
            input_dim,
            label_dim,
        })
    }

    /// Load `inputs.npy`, `labels.npy` and `dataset.json` from a directory
    pub fn from_directory<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref();
        log::info!("Loading calibration dataset from: {:?}", dir);

        let metadata_path = dir.join("dataset.json");
        let metadata: CalibrationMetadata =
            serde_json::from_reader(BufReader::new(File::open(&metadata_path)?))?;

        let inputs = read_floats::<Ix2>(&dir.join("inputs.npy"))?;
        let labels = read_floats::<Ix2>(&dir.join("labels.npy"))?;
        if inputs.nrows() != labels.nrows() {
            return Err(GalshapeError::Data(format!(
                "Row mismatch: inputs {} != labels {}",
                inputs.nrows(),
                labels.nrows()
            )));
        }

        let samples = inputs
            .rows()
            .into_iter()
            .zip(labels.rows())
            .map(|(input, label)| CalibrationSample {
                input: input.to_vec(),
                label: label.to_vec(),
            })
            .collect();

        if !metadata.description.is_empty() {
            log::info!("Dataset description: {}", metadata.description);
        }
        let dataset = Self::new(samples, metadata.real_size)?;
        log::info!(
            "Dataset loaded: {} cases x {} realisations, input width {}",
            dataset.num_cases(),
            dataset.real_size,
            dataset.input_dim
        );
        Ok(dataset)
    }

    /// Group size: realisations per case
    pub fn real_size(&self) -> usize {
        self.real_size
    }

    pub fn num_cases(&self) -> usize {
        self.samples.len() / self.real_size
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn label_dim(&self) -> usize {
        self.label_dim
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Dataset<CalibrationSample> for CalibrationDataset {
    fn get(&self, index: usize) -> Option<CalibrationSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
