//! Supervoxel affinity loss.
//!
//! [`SuperVoxelAffinityLoss::forward`] sequences the whole pipeline for one
//! batch:
//!
//! 1. copy predictions and targets to host memory and decode predicted labels
//!    example by example;
//! 2. compute split/merge critical masks for the batch on the worker pool;
//! 3. move the mask to the loss device and, for every example `i` and edge
//!    `j`, accumulate
//!
//! ```text
//! l      = criterion(decode(pred_i, j), affinity(target_i, e_j))
//! m      = affinity(mask_i, e_j)
//! L     += mean((1 - α) · l + α · m · l)
//! ```
//!
//! `α = 0` is a plain affinity loss; `α = 1` only counts voxels inside
//! critical components.

use ndarray::{Array2, Array4, Array5, ArrayView3, ArrayView4, ArrayView5, Axis, Zip};
use std::sync::Arc;
use tracing::{debug, info};

use crate::affinity::{affinity, AffinityChannelDecoder, Edge};
use crate::config::LossConfig;
use crate::critical::{CriticalDetector, TopologicalCriticalDetector};
use crate::decoder::LabelDecoder;
use crate::device::Located;
use crate::elementwise::ElementwiseLoss;
use crate::error::{ConfigError, LossError, LossResult, ShapeError};
use crate::masks::{CriticalMaskComputer, CriticalStats};
use crate::watershed::{ConnectedComponentsWatershed, LabelVolume, Watershed};

// ---------------------------------------------------------------------------
// LossOutput
// ---------------------------------------------------------------------------

/// Result of one forward call.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Sum over examples and edges of the weighted mean loss.
    pub loss: f64,
    /// Mean critical-component counts of the batch.
    pub stats: CriticalStats,
    /// Per-(example, edge) weighted mean terms, shape `[B, E]`.
    pub terms: Array2<f64>,
    /// Combined critical mask `[B, H, W, D]` the terms were weighted with.
    pub masks: Array4<f32>,
}

// ---------------------------------------------------------------------------
// SuperVoxelAffinityLoss
// ---------------------------------------------------------------------------

/// Topology-aware affinity loss.
pub struct SuperVoxelAffinityLoss {
    config: LossConfig,
    channels: AffinityChannelDecoder,
    labels: LabelDecoder,
    masks: CriticalMaskComputer,
    criterion: Box<dyn ElementwiseLoss>,
}

impl SuperVoxelAffinityLoss {
    /// Build the loss with the built-in watershed, detector and the
    /// configured criterion.
    ///
    /// # Errors
    ///
    /// Any [`LossConfig::validate`] failure, or a worker pool that cannot be
    /// built.
    pub fn new(config: LossConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let watershed = ConnectedComponentsWatershed::with_thresholds(
            config.edges.clone(),
            config.merge_thresholds.clone(),
        );
        let masks = CriticalMaskComputer::new(
            config.beta,
            Arc::new(TopologicalCriticalDetector),
            config.num_workers,
        )?;
        info!(
            edges = config.edges.len(),
            alpha = config.alpha,
            beta = config.beta,
            device = %config.device,
            criterion = ?config.criterion,
            workers = masks.num_workers(),
            "supervoxel affinity loss ready"
        );
        Ok(SuperVoxelAffinityLoss {
            channels: AffinityChannelDecoder::new(config.edges.clone()),
            labels: LabelDecoder::new(config.threshold, Arc::new(watershed)),
            criterion: config.criterion.build(),
            masks,
            config,
        })
    }

    /// Replace the element-wise criterion. It must not reduce.
    pub fn with_criterion(mut self, criterion: Box<dyn ElementwiseLoss>) -> Self {
        self.criterion = criterion;
        self
    }

    /// Replace the watershed used to decode predicted labels.
    pub fn with_watershed(mut self, watershed: Arc<dyn Watershed>) -> Self {
        self.labels = LabelDecoder::new(self.config.threshold, watershed);
        self
    }

    /// Replace the critical-component detector.
    pub fn with_detector(mut self, detector: Arc<dyn CriticalDetector>) -> Self {
        self.masks.set_detector(detector);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Configured edges, in channel order.
    pub fn edges(&self) -> &[Edge] {
        &self.config.edges
    }

    /// Name of the active criterion.
    pub fn criterion_name(&self) -> &'static str {
        self.criterion.name()
    }

    // ── Validation ──────────────────────────────────────────────────────────

    fn check_device<T>(&self, buffer: &'static str, located: &Located<T>) -> LossResult<()> {
        if located.device() != self.config.device {
            return Err(LossError::device_mismatch(buffer, self.config.device, located.device()));
        }
        Ok(())
    }

    /// Shape and channel checks shared by every entry point. Runs before any
    /// worker is dispatched.
    fn check_inputs(&self, pred: ArrayView5<'_, f32>, target: ArrayView4<'_, u64>) -> LossResult<()> {
        let (b, e, h, w, d) = pred.dim();
        if b == 0 {
            return Err(LossError::EmptyBatch);
        }
        if e != self.config.edges.len() {
            return Err(ShapeError::ChannelCountMismatch { channels: e, edges: self.config.edges.len() }.into());
        }
        if target.shape() != [b, h, w, d] {
            return Err(ShapeError::mismatch("target labels", &[b, h, w, d], target.shape()).into());
        }
        for edge in &self.config.edges {
            if edge.window_shape([h, w, d]).is_none() {
                return Err(ShapeError::EmptyWindow { edge: edge.0, shape: [h, w, d] }.into());
            }
        }
        Ok(())
    }

    // ── Pipeline stages ─────────────────────────────────────────────────────

    /// Decode every example of a host-side `[B, E, H, W, D]` prediction.
    pub fn decode_labels(&self, pred: ArrayView5<'_, f32>) -> LossResult<Vec<LabelVolume>> {
        pred.outer_iter()
            .map(|example| self.labels.decode(example).map_err(LossError::from))
            .collect()
    }

    /// Critical masks `[B, H, W, D]` and stats for decoded predictions against
    /// a host-side target batch.
    pub fn critical_masks(
        &self,
        pred_labels: &[LabelVolume],
        target: ArrayView4<'_, u64>,
    ) -> LossResult<(Array4<f32>, CriticalStats)> {
        let target: Vec<LabelVolume> = target.outer_iter().map(|t| t.to_owned()).collect();
        self.masks.compute(pred_labels, &target)
    }

    /// Weighted mean loss of one (example, edge) pair.
    fn edge_term(
        &self,
        pred_i: ArrayView4<'_, f32>,
        target_i: ArrayView3<'_, u64>,
        mask_i: ArrayView3<'_, f32>,
        j: usize,
    ) -> LossResult<f64> {
        let edge = &self.config.edges[j];
        let pred_aff = self.channels.decode(pred_i, j)?;
        let target_aff = affinity(&target_i, edge)?.mapv(|v| v as f32);
        let mask_aff = affinity(&mask_i, edge)?;
        let voxel_loss = self.criterion.loss(pred_aff, target_aff.view())?;
        if voxel_loss.shape() != mask_aff.shape() {
            return Err(ShapeError::mismatch("criterion output", mask_aff.shape(), voxel_loss.shape()).into());
        }

        let alpha = self.config.alpha;
        let mut sum = 0.0f64;
        Zip::from(&voxel_loss).and(&mask_aff).for_each(|&l, &m| {
            let l = f64::from(l);
            sum += (1.0 - alpha) * l + alpha * f64::from(m) * l;
        });
        Ok(sum / voxel_loss.len() as f64)
    }

    // ── Forward ─────────────────────────────────────────────────────────────

    /// Compute the loss and critical stats for a batch.
    ///
    /// - `pred_affs`: `[B, E, H, W, D]` raw predictions on the configured
    ///   device, channel `j` belonging to `edges[j]`.
    /// - `target_labels`: `[B, H, W, D]` ground-truth instance labels.
    ///
    /// # Errors
    ///
    /// Configuration and shape errors are raised before any work starts;
    /// watershed and detection failures abort the whole call.
    pub fn forward(
        &self,
        pred_affs: &Located<Array5<f32>>,
        target_labels: &Located<Array4<u64>>,
    ) -> LossResult<LossOutput> {
        self.check_device("pred_affs", pred_affs)?;
        self.check_device("target_labels", target_labels)?;
        self.check_inputs(pred_affs.value().view(), target_labels.value().view())?;

        let host_pred = pred_affs.to_host();
        let pred_labels = self.decode_labels(host_pred.value().view())?;
        debug!(batch = pred_labels.len(), "decoded predicted labels");
        self.forward_with_labels(pred_affs, &pred_labels, target_labels)
    }

    /// [`forward`](Self::forward) with an already decoded prediction.
    ///
    /// `pred_labels` must hold one `[H, W, D]` volume per example.
    pub fn forward_with_labels(
        &self,
        pred_affs: &Located<Array5<f32>>,
        pred_labels: &[LabelVolume],
        target_labels: &Located<Array4<u64>>,
    ) -> LossResult<LossOutput> {
        self.check_device("pred_affs", pred_affs)?;
        self.check_device("target_labels", target_labels)?;
        self.check_inputs(pred_affs.value().view(), target_labels.value().view())?;

        let host_target = target_labels.to_host();
        let (masks, stats) = self.critical_masks(pred_labels, host_target.value().view())?;

        let device = self.config.device;
        let masks = Located::host(masks).to(device);
        let target = host_target.to(device);

        let (b, e, ..) = pred_affs.value().dim();
        let mut terms = Array2::<f64>::zeros((b, e));
        for i in 0..b {
            let pred_i = pred_affs.value().index_axis(Axis(0), i);
            let target_i = target.value().index_axis(Axis(0), i);
            let mask_i = masks.value().index_axis(Axis(0), i);
            for j in 0..e {
                terms[[i, j]] = self.edge_term(pred_i, target_i, mask_i, j)?;
            }
        }
        let loss = terms.sum();
        debug!(loss, splits = stats.splits, merges = stats.merges, "supervoxel loss computed");
        Ok(LossOutput { loss, stats, terms, masks: masks.into_inner() })
    }
}

impl std::fmt::Debug for SuperVoxelAffinityLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperVoxelAffinityLoss")
            .field("config", &self.config)
            .field("criterion", &self.criterion.name())
            .finish_non_exhaustive()
    }
}
