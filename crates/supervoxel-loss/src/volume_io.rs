//! `.npy` volume I/O.
//!
//! - predictions: `float32` array `[B, E, H, W, D]`
//! - targets: integer array `[B, H, W, D]` (`int64`, `uint64`, `int32`,
//!   `uint32`, `uint16` or `uint8`; negative ids are rejected)
//! - critical masks: written as `float32` `[B, H, W, D]`

use ndarray::{Array4, Array5, ArrayD, Ix4, Ix5};
use ndarray_npy::{ReadNpyExt, ReadableElement, WriteNpyExt};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

use crate::error::VolumeIoError;

fn open(path: &Path) -> Result<File, VolumeIoError> {
    File::open(path).map_err(|e| VolumeIoError::io(path, e))
}

fn read_dyn<A: ReadableElement>(path: &Path) -> Result<ArrayD<A>, VolumeIoError> {
    ArrayD::<A>::read_npy(open(path)?).map_err(|e| VolumeIoError::npy_read(path, e.to_string()))
}

/// Load a `[B, E, H, W, D]` float32 prediction.
pub fn load_pred_affinities(path: &Path) -> Result<Array5<f32>, VolumeIoError> {
    let arr = read_dyn::<f32>(path)?;
    let shape = arr.shape().to_vec();
    let arr = arr.into_dimensionality::<Ix5>().map_err(|_| VolumeIoError::Dimensionality {
        path: path.to_path_buf(),
        expected: 5,
        shape,
    })?;
    debug!(path = %path.display(), shape = ?arr.shape(), "loaded predicted affinities");
    Ok(arr)
}

/// Load a `[B, H, W, D]` label batch from any supported integer dtype.
pub fn load_target_labels(path: &Path) -> Result<Array4<u64>, VolumeIoError> {
    let labels: ArrayD<u64> = if let Ok(a) = read_dyn::<i64>(path) {
        if let Some(&value) = a.iter().find(|&&v| v < 0) {
            return Err(VolumeIoError::NegativeLabel { path: path.to_path_buf(), value });
        }
        a.mapv(|v| v as u64)
    } else if let Ok(a) = read_dyn::<u64>(path) {
        a
    } else if let Ok(a) = read_dyn::<i32>(path) {
        if let Some(&value) = a.iter().find(|&&v| v < 0) {
            return Err(VolumeIoError::NegativeLabel { path: path.to_path_buf(), value: i64::from(value) });
        }
        a.mapv(|v| v as u64)
    } else if let Ok(a) = read_dyn::<u32>(path) {
        a.mapv(u64::from)
    } else if let Ok(a) = read_dyn::<u16>(path) {
        a.mapv(u64::from)
    } else {
        // last attempt reports its own error
        read_dyn::<u8>(path)?.mapv(u64::from)
    };
    let shape = labels.shape().to_vec();
    let labels = labels.into_dimensionality::<Ix4>().map_err(|_| VolumeIoError::Dimensionality {
        path: path.to_path_buf(),
        expected: 4,
        shape,
    })?;
    debug!(path = %path.display(), shape = ?labels.shape(), "loaded target labels");
    Ok(labels)
}

/// Write a `[B, H, W, D]` critical mask as float32.
pub fn save_critical_mask(path: &Path, mask: &Array4<f32>) -> Result<(), VolumeIoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VolumeIoError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| VolumeIoError::io(path, e))?;
    mask.write_npy(BufWriter::new(file)).map_err(|e| VolumeIoError::NpyWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "wrote critical mask");
    Ok(())
}
