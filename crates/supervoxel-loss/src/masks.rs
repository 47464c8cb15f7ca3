//! Batch-parallel critical masks.
//!
//! For every example two detections run as independent tasks on a bounded
//! worker pool:
//!
//! ```text
//! split_i = detect(target_i, predicted_i)
//! merge_i = detect(predicted_i, target_i)
//! ```
//!
//! Each task owns copies of its two volumes and returns a tagged
//! [`CriticalResult`]. Results are routed by their `(example, kind)` tag, never
//! by position, and merged on the calling thread only after every task has
//! finished:
//!
//! ```text
//! mask_i = β · split_mask_i + (1 - β) · merge_mask_i
//! Splits = mean_i(split_count_i)     Merges = mean_i(merge_count_i)
//! ```
//!
//! The first failing task aborts the batch; no partial mask is returned.

use ndarray::{Array3, Array4, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::critical::{CriticalComponents, CriticalDetector, CriticalKind};
use crate::error::{ConfigError, DetectError, LossError, LossResult, ShapeError};
use crate::watershed::LabelVolume;

// ---------------------------------------------------------------------------
// CriticalStats
// ---------------------------------------------------------------------------

/// Per-batch mean critical-component counts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CriticalStats {
    /// Mean number of split-critical components per example.
    #[serde(rename = "Splits")]
    pub splits: f64,
    /// Mean number of merge-critical components per example.
    #[serde(rename = "Merges")]
    pub merges: f64,
}

// ---------------------------------------------------------------------------
// Tasks and tagged results
// ---------------------------------------------------------------------------

/// One detection to run: owned inputs plus the tag to route its result.
#[derive(Debug, Clone)]
struct CriticalTask {
    example: usize,
    kind: CriticalKind,
    reference: LabelVolume,
    candidate: LabelVolume,
}

/// Result of one detection, tagged with where it belongs.
#[derive(Debug, Clone)]
pub struct CriticalResult {
    /// Batch index of the example.
    pub example: usize,
    /// Which analysis produced it.
    pub kind: CriticalKind,
    /// Detected components.
    pub components: CriticalComponents,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_task(detector: &dyn CriticalDetector, task: CriticalTask) -> Result<CriticalResult, DetectError> {
    let CriticalTask { example, kind, reference, candidate } = task;
    trace!(example, %kind, "critical detection started");
    let components = catch_unwind(AssertUnwindSafe(|| detector.detect(reference.view(), candidate.view())))
        .map_err(|payload| DetectError::WorkerPanicked {
            example,
            kind,
            message: panic_message(payload),
        })??;
    if components.mask.shape() != reference.shape() {
        return Err(DetectError::MaskShape {
            expected: reference.shape().to_vec(),
            actual: components.mask.shape().to_vec(),
        });
    }
    trace!(example, %kind, count = components.count, "critical detection finished");
    Ok(CriticalResult { example, kind, components })
}

// ---------------------------------------------------------------------------
// CriticalMaskComputer
// ---------------------------------------------------------------------------

/// Runs split and merge detection for a whole batch on a worker pool and
/// combines the results.
pub struct CriticalMaskComputer {
    beta: f64,
    detector: Arc<dyn CriticalDetector>,
    pool: ThreadPool,
}

impl CriticalMaskComputer {
    /// Create a computer with `num_workers` threads (`0` = one per core).
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if `beta` is outside `[0, 1]` and
    /// [`ConfigError::WorkerPool`] if the pool cannot be built.
    pub fn new(
        beta: f64,
        detector: Arc<dyn CriticalDetector>,
        num_workers: usize,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&beta) {
            return Err(ConfigError::invalid_value("beta", "must be in [0.0, 1.0]"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("critical-worker-{i}"))
            .build()
            .map_err(|e| ConfigError::WorkerPool { num_workers, reason: e.to_string() })?;
        Ok(CriticalMaskComputer { beta, detector, pool })
    }

    /// Split/merge weighting.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Replace the detector.
    pub fn set_detector(&mut self, detector: Arc<dyn CriticalDetector>) {
        self.detector = detector;
    }

    /// Run every detection of the batch and return the tagged results in
    /// completion-independent order.
    ///
    /// # Errors
    ///
    /// The first task failure, after which no further result is used.
    pub fn detect_all(
        &self,
        predicted: &[LabelVolume],
        target: &[LabelVolume],
    ) -> LossResult<Vec<CriticalResult>> {
        check_batch(predicted, target)?;

        let mut tasks = Vec::with_capacity(2 * predicted.len());
        for (example, (pred, tgt)) in predicted.iter().zip(target).enumerate() {
            tasks.push(CriticalTask {
                example,
                kind: CriticalKind::Split,
                reference: tgt.clone(),
                candidate: pred.clone(),
            });
            tasks.push(CriticalTask {
                example,
                kind: CriticalKind::Merge,
                reference: pred.clone(),
                candidate: tgt.clone(),
            });
        }

        debug!(tasks = tasks.len(), workers = self.num_workers(), "dispatching critical detection");
        let detector = self.detector.as_ref();
        let results = self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| run_task(detector, task))
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(results)
    }

    /// Compute the `[B, H, W, D]` critical mask and the batch stats.
    ///
    /// # Errors
    ///
    /// [`LossError::EmptyBatch`] for an empty batch, [`ShapeError`] when the
    /// two batches disagree, and any worker failure.
    pub fn compute(
        &self,
        predicted: &[LabelVolume],
        target: &[LabelVolume],
    ) -> LossResult<(Array4<f32>, CriticalStats)> {
        let results = self.detect_all(predicted, target)?;
        self.combine(predicted.len(), predicted[0].dim(), results)
    }

    /// Merge tagged results into a batch mask and stats.
    fn combine(
        &self,
        batch: usize,
        (h, w, d): (usize, usize, usize),
        results: Vec<CriticalResult>,
    ) -> LossResult<(Array4<f32>, CriticalStats)> {
        let mut splits: Vec<Option<CriticalComponents>> = vec![None; batch];
        let mut merges: Vec<Option<CriticalComponents>> = vec![None; batch];
        for CriticalResult { example, kind, components } in results {
            let slot = match kind {
                CriticalKind::Split => &mut splits[example],
                CriticalKind::Merge => &mut merges[example],
            };
            *slot = Some(components);
        }

        let mut masks = Array4::<f32>::zeros((batch, h, w, d));
        let mut stats = CriticalStats::default();
        let n = batch as f64;
        for (example, (split, merge)) in splits.into_iter().zip(merges).enumerate() {
            let split = split.ok_or_else(|| DetectError::failed(example, CriticalKind::Split, "no result"))?;
            let merge = merge.ok_or_else(|| DetectError::failed(example, CriticalKind::Merge, "no result"))?;
            stats.splits += split.count as f64 / n;
            stats.merges += merge.count as f64 / n;
            masks
                .index_axis_mut(Axis(0), example)
                .assign(&combine_masks(&split.mask, &merge.mask, self.beta));
        }
        debug!(splits = stats.splits, merges = stats.merges, "critical masks combined");
        Ok((masks, stats))
    }
}

impl std::fmt::Debug for CriticalMaskComputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalMaskComputer")
            .field("beta", &self.beta)
            .field("num_workers", &self.num_workers())
            .finish_non_exhaustive()
    }
}

fn check_batch(predicted: &[LabelVolume], target: &[LabelVolume]) -> Result<(), LossError> {
    if predicted.is_empty() {
        return Err(LossError::EmptyBatch);
    }
    if predicted.len() != target.len() {
        return Err(ShapeError::mismatch("batch size", &[target.len()], &[predicted.len()]).into());
    }
    let shape = target[0].shape();
    for (p, t) in predicted.iter().zip(target) {
        if t.shape() != shape {
            return Err(ShapeError::mismatch("target volume", shape, t.shape()).into());
        }
        if p.shape() != shape {
            return Err(ShapeError::mismatch("predicted volume", shape, p.shape()).into());
        }
    }
    Ok(())
}

/// Combine a split mask and a merge mask with weight `beta`.
///
/// Both masks are binary, so the result stays in `[0, 1]`.
pub fn combine_masks(split: &Array3<u8>, merge: &Array3<u8>, beta: f64) -> Array3<f32> {
    let b = beta as f32;
    let mut out = split.mapv(|m| b * f32::from(m));
    out.zip_mut_with(merge, |dst, &m| *dst += (1.0 - b) * f32::from(m));
    out
}
