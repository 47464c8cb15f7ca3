//! Deterministic synthetic volumes.
//!
//! Block-shaped label volumes, perfect-prediction logits and injected
//! topological errors for tests, benchmarks and dry runs. **No random data**:
//! every voxel is a pure function of its coordinates and the example index.
//!
//! ## Target model
//!
//! Two slabs along the first axis separated by a one-voxel background gap at
//! `x = H / 2`:
//!
//! ```text
//! label(x, y, z) = 1   if x < H/2
//!                  0   if x = H/2
//!                  2   if x > H/2
//! ```
//!
//! ## Prediction model
//!
//! Example `i` is a perfect prediction (`i % 3 == 0`), a split of object 1 into
//! objects 1 and 3 by a background plane at `x = H / 4` (`i % 3 == 1`), or a
//! merge of both objects into object 1 by filling the gap (`i % 3 == 2`).
//! Predicted logits are `+confidence` where the affinity is 1 and
//! `-confidence` elsewhere, so they decode back to these label volumes.

use ndarray::{s, Array3, Array4, Array5, ArrayView3, Axis};

use crate::affinity::{affinity_volume, Edge};
use crate::error::ShapeError;
use crate::watershed::LabelVolume;

/// Smallest first-axis length that fits the split and merge injections.
pub const MIN_LENGTH: usize = 8;

/// Configuration for [`SyntheticBatch::generate`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Number of examples. Default: **3**.
    pub batch_size: usize,
    /// Spatial shape `(H, W, D)`. `H` must be at least 8. Default: **(16, 16, 16)**.
    pub shape: (usize, usize, usize),
    /// Affinity edges. Default: the three unit edges.
    pub edges: Vec<Edge>,
    /// Magnitude of the predicted logits. Default: **6.0**.
    pub confidence: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            batch_size: 3,
            shape: (16, 16, 16),
            edges: Edge::unit_edges(),
            confidence: 6.0,
        }
    }
}

/// Two slabs separated by a background plane at `x = H / 2`.
pub fn two_slabs(shape: (usize, usize, usize)) -> LabelVolume {
    let gap = shape.0 / 2;
    Array3::from_shape_fn(shape, |(x, _, _)| match x {
        x if x < gap => 1,
        x if x == gap => 0,
        _ => 2,
    })
}

/// Copy of `labels` with the plane `index` along `axis` set to background.
pub fn cut(labels: ArrayView3<'_, u64>, axis: usize, index: usize) -> LabelVolume {
    let mut out = labels.to_owned();
    out.index_axis_mut(Axis(axis), index).fill(0);
    out
}

/// Copy of `labels` with the plane `index` along `axis` set to `label`.
pub fn bridge(labels: ArrayView3<'_, u64>, axis: usize, index: usize, label: u64) -> LabelVolume {
    let mut out = labels.to_owned();
    out.index_axis_mut(Axis(axis), index).fill(label);
    out
}

/// Copy of `labels` with every `from` voxel renamed to `to`.
pub fn relabel(labels: ArrayView3<'_, u64>, from: u64, to: u64) -> LabelVolume {
    labels.mapv(|v| if v == from { to } else { v })
}

/// `[E, H, W, D]` logits that decode exactly to `labels`.
pub fn prediction_logits(
    labels: ArrayView3<'_, u64>,
    edges: &[Edge],
    confidence: f32,
) -> Result<Array4<f32>, ShapeError> {
    Ok(affinity_volume(labels, edges)?.mapv(|a| if a > 0.5 { confidence } else { -confidence }))
}

/// A generated batch.
#[derive(Debug, Clone)]
pub struct SyntheticBatch {
    /// `[B, E, H, W, D]` predicted logits.
    pub pred_affs: Array5<f32>,
    /// `[B, H, W, D]` ground-truth labels.
    pub target_labels: Array4<u64>,
    /// The label volumes the predictions were generated from.
    pub pred_labels: Vec<LabelVolume>,
}

impl SyntheticBatch {
    /// Generate a batch following the module-level model.
    ///
    /// # Errors
    ///
    /// [`ShapeError::AxisTooShort`] if `shape.0 < 8`, which leaves no room for
    /// the injected errors, and [`ShapeError`] if an edge does not fit the
    /// configured shape.
    pub fn generate(config: &SyntheticConfig) -> Result<Self, ShapeError> {
        let (h, w, d) = config.shape;
        if h < MIN_LENGTH {
            return Err(ShapeError::AxisTooShort { axis: 0, len: h, min: MIN_LENGTH });
        }
        let b = config.batch_size;
        let e = config.edges.len();
        let target = two_slabs(config.shape);

        let mut pred_affs = Array5::<f32>::zeros((b, e, h, w, d));
        let mut target_labels = Array4::<u64>::zeros((b, h, w, d));
        let mut pred_labels = Vec::with_capacity(b);
        for i in 0..b {
            let pred = match i % 3 {
                0 => target.clone(),
                1 => {
                    let mut split = cut(target.view(), 0, h / 4);
                    split.slice_mut(s![h / 4 + 1..h / 2, .., ..]).fill(3);
                    split
                }
                _ => relabel(bridge(target.view(), 0, h / 2, 1).view(), 2, 1),
            };
            pred_affs
                .slice_mut(s![i, .., .., .., ..])
                .assign(&prediction_logits(pred.view(), &config.edges, config.confidence)?);
            target_labels.index_axis_mut(Axis(0), i).assign(&target);
            pred_labels.push(pred);
        }
        Ok(SyntheticBatch { pred_affs, target_labels, pred_labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_slabs_layout() {
        let labels = two_slabs((8, 2, 2));
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[3, 1, 1]], 1);
        assert_eq!(labels[[4, 0, 0]], 0);
        assert_eq!(labels[[5, 0, 0]], 2);
    }

    #[test]
    fn batch_shapes_follow_config() {
        let cfg = SyntheticConfig { batch_size: 4, shape: (8, 4, 4), ..SyntheticConfig::default() };
        let batch = SyntheticBatch::generate(&cfg).unwrap();
        assert_eq!(batch.pred_affs.shape(), &[4, 3, 8, 4, 4]);
        assert_eq!(batch.target_labels.shape(), &[4, 8, 4, 4]);
        assert_eq!(batch.pred_labels.len(), 4);
        assert_eq!(batch.pred_labels[1][[2, 0, 0]], 0);
        assert_eq!(batch.pred_labels[1][[3, 0, 0]], 3);
        assert_eq!(batch.pred_labels[1][[5, 0, 0]], 2);
        assert!(batch.pred_labels[2].iter().all(|&v| v == 1));
        assert_eq!(batch.pred_labels[3], batch.target_labels.index_axis(Axis(0), 3));
    }

    #[test]
    fn short_first_axis_is_an_error() {
        let cfg = SyntheticConfig { shape: (7, 4, 4), ..SyntheticConfig::default() };
        assert!(matches!(
            SyntheticBatch::generate(&cfg),
            Err(ShapeError::AxisTooShort { axis: 0, len: 7, min: 8 })
        ));
    }

    #[test]
    fn logits_are_signed_affinities() {
        let labels = two_slabs((8, 1, 1));
        let logits = prediction_logits(labels.view(), &[Edge::new(1, 0, 0)], 3.0).unwrap();
        // x = 1 connects to x = 0 inside object 1
        assert_eq!(logits[[0, 1, 0, 0]], 3.0);
        // x = 0 lies outside the window
        assert_eq!(logits[[0, 0, 0, 0]], -3.0);
        // x = 4 is the gap
        assert_eq!(logits[[0, 4, 0, 0]], -3.0);
    }
}
