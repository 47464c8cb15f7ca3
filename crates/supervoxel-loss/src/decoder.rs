//! Predicted affinities → instance labels.

use ndarray::{Array4, ArrayView4};
use std::sync::Arc;
use tracing::trace;

use crate::error::WatershedError;
use crate::watershed::{LabelVolume, Watershed};

/// Background ids handed to the watershed.
pub const BACKGROUND_IDS: [u64; 1] = [0];

/// Binarizes one example's predicted affinities and labels them with a
/// [`Watershed`].
///
/// Only the finest segmentation of the watershed sequence is used. The decoder
/// holds no per-example state.
#[derive(Clone)]
pub struct LabelDecoder {
    threshold: f32,
    watershed: Arc<dyn Watershed>,
}

impl LabelDecoder {
    /// Create a decoder with the given binarization cutoff.
    pub fn new(threshold: f32, watershed: Arc<dyn Watershed>) -> Self {
        LabelDecoder { threshold, watershed }
    }

    /// Binarization cutoff.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `1.0` where `pred > threshold`, else `0.0`.
    pub fn binarize(&self, pred: ArrayView4<'_, f32>) -> Array4<f32> {
        let threshold = self.threshold;
        pred.mapv(|v| if v > threshold { 1.0 } else { 0.0 })
    }

    /// Decode a `[E, H, W, D]` prediction into a label volume.
    ///
    /// # Errors
    ///
    /// Propagates watershed failures, and returns
    /// [`WatershedError::EmptySequence`] if the watershed yields nothing.
    pub fn decode(&self, pred: ArrayView4<'_, f32>) -> Result<LabelVolume, WatershedError> {
        let binary = self.binarize(pred);
        let labels = self
            .watershed
            .run(binary.view(), &BACKGROUND_IDS)?
            .next()
            .ok_or(WatershedError::EmptySequence)??;
        trace!(shape = ?labels.shape(), "decoded predicted labels");
        Ok(labels)
    }
}

impl std::fmt::Debug for LabelDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelDecoder").field("threshold", &self.threshold).finish_non_exhaustive()
    }
}
