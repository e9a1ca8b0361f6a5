//! Galaxy/PSF stamp dataset for shape regression
use burn::data::dataset::Dataset;
use ndarray::{Ix1, Ix2, Ix3};
use std::path::Path;

use super::npy::{read_floats, read_ints};
use crate::{GalshapeError, Result};

/// One simulated galaxy with its PSF and true shape parameters
#[derive(Debug, Clone)]
pub struct ShapeSample {
    pub id: i64,
    /// Galaxy stamp, row-major `[stamp, stamp]`
    pub gal_image: Vec<f32>,
    /// PSF stamp, row-major `[psf_stamp, psf_stamp]`
    pub psf_image: Vec<f32>,
    /// True shape parameters
    pub label: Vec<f32>,
    pub snr: f32,
}

/// In-memory set of galaxy samples with fixed stamp sizes
#[derive(Debug, Clone)]
pub struct ShapeDataset {
    samples: Vec<ShapeSample>,
    galaxy_stamp: usize,
    psf_stamp: usize,
    features: usize,
}

impl ShapeDataset {
    /// Build from samples, checking every one matches the declared sizes
    pub fn new(
        samples: Vec<ShapeSample>,
        galaxy_stamp: usize,
        psf_stamp: usize,
        features: usize,
    ) -> Result<Self> {
        for sample in &samples {
            if sample.gal_image.len() != galaxy_stamp * galaxy_stamp
                || sample.psf_image.len() != psf_stamp * psf_stamp
                || sample.label.len() != features
            {
                return Err(GalshapeError::Data(format!(
                    "sample {} does not match stamps {}/{} with {} features",
                    sample.id, galaxy_stamp, psf_stamp, features
                )));
            }
        }

        Ok(ShapeDataset {
            samples,
            galaxy_stamp,
            psf_stamp,
            features,
        })
    }

    /// Load `gal_images.npy`, `psf_images.npy`, `labels.npy` and the optional
    /// `ids.npy` / `snr.npy` from a directory
    pub fn from_directory<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref();
        log::info!("Loading shape dataset from: {:?}", dir);

        let galaxies = read_floats::<Ix3>(&dir.join("gal_images.npy"))?;
        let psfs = read_floats::<Ix3>(&dir.join("psf_images.npy"))?;
        let labels = read_floats::<Ix2>(&dir.join("labels.npy"))?;

        let n = galaxies.shape()[0];
        if psfs.shape()[0] != n || labels.nrows() != n {
            return Err(GalshapeError::Data(format!(
                "Sample count mismatch: galaxies {}, psfs {}, labels {}",
                n,
                psfs.shape()[0],
                labels.nrows()
            )));
        }
        if galaxies.shape()[1] != galaxies.shape()[2] || psfs.shape()[1] != psfs.shape()[2] {
            return Err(GalshapeError::Data(format!(
                "Stamps must be square: galaxies {:?}, psfs {:?}",
                galaxies.shape(),
                psfs.shape()
            )));
        }

        let ids_path = dir.join("ids.npy");
        let ids: Vec<i64> = if ids_path.exists() {
            read_ints::<Ix1>(&ids_path)?.to_vec()
        } else {
            log::warn!("ids.npy not found, numbering samples from 0");
            (0..n as i64).collect()
        };

        let snr_path = dir.join("snr.npy");
        let snr: Vec<f32> = if snr_path.exists() {
            read_floats::<Ix1>(&snr_path)?.to_vec()
        } else {
            log::warn!("snr.npy not found, using NaN");
            vec![f32::NAN; n]
        };

        if ids.len() != n || snr.len() != n {
            return Err(GalshapeError::Data(format!(
                "Metadata length mismatch: {} samples, {} ids, {} snr",
                n,
                ids.len(),
                snr.len()
            )));
        }

        let samples = (0..n)
            .map(|i| ShapeSample {
                id: ids[i],
                gal_image: galaxies.index_axis(ndarray::Axis(0), i).iter().copied().collect(),
                psf_image: psfs.index_axis(ndarray::Axis(0), i).iter().copied().collect(),
                label: labels.row(i).to_vec(),
                snr: snr[i],
            })
            .collect();

        let dataset = Self::new(samples, galaxies.shape()[1], psfs.shape()[1], labels.ncols())?;
        log::info!(
            "Dataset loaded: {} samples, galaxy stamp {}, psf stamp {}, {} features",
            dataset.len(),
            dataset.galaxy_stamp,
            dataset.psf_stamp,
            dataset.features
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn galaxy_stamp(&self) -> usize {
        self.galaxy_stamp
    }

    pub fn psf_stamp(&self) -> usize {
        self.psf_stamp
    }

    pub fn features(&self) -> usize {
        self.features
    }
}

impl Dataset<ShapeSample> for ShapeDataset {
    fn get(&self, index: usize) -> Option<ShapeSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
