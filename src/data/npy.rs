//! Reading simulator output stored as NumPy .npy arrays
use ndarray::{Array, Dimension};
use ndarray_npy::ReadNpyExt;
use std::fs::File;
use std::path::Path;

use crate::{GalshapeError, Result};

/// Read a float array, accepting float32 or float64 on disk
pub fn read_floats<D: Dimension>(path: &Path) -> Result<Array<f32, D>> {
    let single = <Array<f32, D> as ReadNpyExt>::read_npy(File::open(path)?);
    match single {
        Ok(array) => Ok(array),
        Err(_) => {
            let double = <Array<f64, D> as ReadNpyExt>::read_npy(File::open(path)?)
                .map_err(|e| {
                    GalshapeError::Data(format!("Failed to read {}: {}", path.display(), e))
                })?;
            Ok(double.mapv(|x| x as f32))
        }
    }
}

/// Read an integer array, accepting int64 or int32 on disk
pub fn read_ints<D: Dimension>(path: &Path) -> Result<Array<i64, D>> {
    let wide = <Array<i64, D> as ReadNpyExt>::read_npy(File::open(path)?);
    match wide {
        Ok(array) => Ok(array),
        Err(_) => {
            let narrow = <Array<i32, D> as ReadNpyExt>::read_npy(File::open(path)?)
                .map_err(|e| {
                    GalshapeError::Data(format!("Failed to read {}: {}", path.display(), e))
                })?;
            Ok(narrow.mapv(i64::from))
        }
    }
}
