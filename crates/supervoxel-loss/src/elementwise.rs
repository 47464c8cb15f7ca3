//! Element-wise (unreduced) loss criteria.
//!
//! The aggregator owns the reduction: it weights each voxel's loss by the
//! critical mask before taking the mean. A criterion must therefore return
//! one loss value per input element.
//!
//! ```text
//! BCE-with-logits:  l = max(x, 0) - x·y + ln(1 + e^{-|x|})
//! MSE:              l = (x - y)²
//! ```

use ndarray::{Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// An element-wise loss `(prediction, target) -> loss` of matching shape.
///
/// Implementations must not reduce.
pub trait ElementwiseLoss: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Compute the per-element loss.
    ///
    /// # Errors
    ///
    /// [`ShapeError::Mismatch`] if `prediction` and `target` differ in shape.
    fn loss(
        &self,
        prediction: ArrayView3<'_, f32>,
        target: ArrayView3<'_, f32>,
    ) -> Result<Array3<f32>, ShapeError>;
}

fn check_shapes(prediction: &ArrayView3<'_, f32>, target: &ArrayView3<'_, f32>) -> Result<(), ShapeError> {
    if prediction.shape() != target.shape() {
        return Err(ShapeError::mismatch("criterion target", prediction.shape(), target.shape()));
    }
    Ok(())
}

/// Binary cross-entropy on raw logits, computed in the numerically stable
/// form.
#[derive(Debug, Clone, Copy, Default)]
pub struct BceWithLogitsLoss;

impl ElementwiseLoss for BceWithLogitsLoss {
    fn name(&self) -> &'static str {
        "bce_with_logits"
    }

    fn loss(
        &self,
        prediction: ArrayView3<'_, f32>,
        target: ArrayView3<'_, f32>,
    ) -> Result<Array3<f32>, ShapeError> {
        check_shapes(&prediction, &target)?;
        Ok(Zip::from(&prediction)
            .and(&target)
            .map_collect(|&x, &y| x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()))
    }
}

/// Squared error.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl ElementwiseLoss for MseLoss {
    fn name(&self) -> &'static str {
        "mse"
    }

    fn loss(
        &self,
        prediction: ArrayView3<'_, f32>,
        target: ArrayView3<'_, f32>,
    ) -> Result<Array3<f32>, ShapeError> {
        check_shapes(&prediction, &target)?;
        Ok(Zip::from(&prediction).and(&target).map_collect(|&x, &y| (x - y) * (x - y)))
    }
}

/// Criterion selectable from a JSON config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    /// [`BceWithLogitsLoss`].
    #[default]
    BceWithLogits,
    /// [`MseLoss`].
    Mse,
}

impl CriterionKind {
    /// Instantiate the criterion.
    pub fn build(self) -> Box<dyn ElementwiseLoss> {
        match self {
            CriterionKind::BceWithLogits => Box::new(BceWithLogitsLoss),
            CriterionKind::Mse => Box::new(MseLoss),
        }
    }
}
