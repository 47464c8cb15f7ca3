//! Integration tests for [`supervoxel_loss::loss`].
//!
//! Expected values are recomputed independently from the public affinity and
//! criterion building blocks. All inputs are deterministic.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::{s, Array3, Array4, Array5, ArrayView3, Axis};
use supervoxel_loss::affinity::{affinity, AffinityChannelDecoder, Edge};
use supervoxel_loss::config::LossConfig;
use supervoxel_loss::critical::{CriticalComponents, CriticalDetector};
use supervoxel_loss::device::{Device, Located};
use supervoxel_loss::elementwise::{BceWithLogitsLoss, ElementwiseLoss, MseLoss};
use supervoxel_loss::error::DetectError;
use supervoxel_loss::loss::SuperVoxelAffinityLoss;
use supervoxel_loss::masks::CriticalStats;
use supervoxel_loss::synthetic::{SyntheticBatch, SyntheticConfig};

fn small_batch() -> SyntheticBatch {
    SyntheticBatch::generate(&SyntheticConfig { shape: (8, 4, 4), ..SyntheticConfig::default() }).unwrap()
}

fn config(edges: Vec<Edge>, alpha: f64) -> LossConfig {
    let mut cfg = LossConfig::with_edges(edges);
    cfg.alpha = alpha;
    cfg.num_workers = 2;
    cfg
}

/// Flags every voxel of every example.
struct FlagEverything;

impl CriticalDetector for FlagEverything {
    fn detect(
        &self,
        reference: ArrayView3<'_, u64>,
        _candidate: ArrayView3<'_, u64>,
    ) -> Result<CriticalComponents, DetectError> {
        Ok(CriticalComponents { mask: Array3::ones(reference.dim()), count: 1 })
    }
}

/// Sum over examples and edges of the unweighted mean criterion.
fn plain_loss(pred: &Array5<f32>, target: &Array4<u64>, edges: &[Edge], criterion: &dyn ElementwiseLoss) -> f64 {
    let decoder = AffinityChannelDecoder::new(edges.to_vec());
    let mut total = 0.0;
    for (pred_i, target_i) in pred.outer_iter().zip(target.outer_iter()) {
        for (j, edge) in edges.iter().enumerate() {
            let p = decoder.decode(pred_i.view(), j).unwrap();
            let t = affinity(&target_i, edge).unwrap().mapv(|v| v as f32);
            let l = criterion.loss(p, t.view()).unwrap();
            total += l.iter().map(|&v| f64::from(v)).sum::<f64>() / l.len() as f64;
        }
    }
    total
}

#[test]
fn alpha_zero_is_plain_affinity_loss() {
    let batch = small_batch();
    let edges = Edge::unit_edges();
    let expected = plain_loss(&batch.pred_affs, &batch.target_labels, &edges, &BceWithLogitsLoss);

    let pred = Located::host(batch.pred_affs.clone());
    let target = Located::host(batch.target_labels.clone());
    let loss = SuperVoxelAffinityLoss::new(config(edges.clone(), 0.0)).unwrap();
    let out = loss.forward(&pred, &target).unwrap();
    assert_abs_diff_eq!(out.loss, expected, epsilon = 1e-6);

    // the mask has no influence at alpha = 0
    let flagged = SuperVoxelAffinityLoss::new(config(edges, 0.0))
        .unwrap()
        .with_detector(Arc::new(FlagEverything));
    let out_flagged = flagged.forward(&pred, &target).unwrap();
    assert_abs_diff_eq!(out_flagged.loss, expected, epsilon = 1e-6);
    assert_eq!(out_flagged.stats, CriticalStats { splits: 1.0, merges: 1.0 });
}

#[test]
fn split_in_one_example_is_counted_once() {
    // batch of 2, single edge (1, 0, 0), 4×4×4, one object everywhere;
    // example 0 is predicted as two disjoint blocks separated by x = 2
    let alpha = 0.5;
    let loss = SuperVoxelAffinityLoss::new(config(vec![Edge::new(1, 0, 0)], alpha)).unwrap();
    let pred = Located::host(Array5::<f32>::from_elem((2, 1, 4, 4, 4), 2.0));
    let target = Located::host(Array4::<u64>::from_elem((2, 4, 4, 4), 1));

    let mut split = Array3::<u64>::from_elem((4, 4, 4), 1);
    split.slice_mut(s![2, .., ..]).fill(0);
    split.slice_mut(s![3.., .., ..]).fill(2);
    let labels = vec![split, Array3::<u64>::from_elem((4, 4, 4), 1)];

    let out = loss.forward_with_labels(&pred, &labels, &target).unwrap();
    assert_eq!(out.stats, CriticalStats { splits: 0.5, merges: 0.0 });

    // BCE of logit 2 against target 1
    let l = (1.0f64 + (-2.0f64).exp()).ln();
    // example 1 has no critical voxels: only the (1 - α) voxel-level part remains
    assert_abs_diff_eq!(out.terms[[1, 0]], (1.0 - alpha) * l, epsilon = 1e-6);
    // the single critical plane has no critical partner along x
    assert_abs_diff_eq!(out.terms[[0, 0]], (1.0 - alpha) * l, epsilon = 1e-6);
    assert_abs_diff_eq!(out.loss, out.terms.sum(), epsilon = 1e-12);
}

#[test]
fn critical_pairs_are_upweighted() {
    // adjacent relabel: the boundary slab x = 1..2 is critical, and the mask
    // affinity is nonzero on one of the three windowed planes
    let alpha = 0.5;
    let loss = SuperVoxelAffinityLoss::new(config(vec![Edge::new(1, 0, 0)], alpha)).unwrap();
    let pred = Located::host(Array5::<f32>::from_elem((1, 1, 4, 4, 4), 2.0));
    let target = Located::host(Array4::<u64>::from_elem((1, 4, 4, 4), 1));
    let mut split = Array3::<u64>::from_elem((4, 4, 4), 1);
    split.slice_mut(s![2.., .., ..]).fill(2);

    let out = loss.forward_with_labels(&pred, &[split], &target).unwrap();
    assert_eq!(out.stats, CriticalStats { splits: 1.0, merges: 0.0 });
    let l = (1.0f64 + (-2.0f64).exp()).ln();
    assert_abs_diff_eq!(out.loss, (1.0 - alpha) * l + alpha * l / 3.0, epsilon = 1e-6);
}

#[test]
fn perfect_prediction_has_no_critical_components() {
    let batch = SyntheticBatch::generate(&SyntheticConfig {
        batch_size: 1,
        shape: (8, 4, 4),
        ..SyntheticConfig::default()
    })
    .unwrap();
    let loss = SuperVoxelAffinityLoss::new(LossConfig::default()).unwrap();
    let out = loss
        .forward(&Located::host(batch.pred_affs), &Located::host(batch.target_labels))
        .unwrap();
    assert_eq!(out.stats, CriticalStats::default());
    assert!(out.loss > 0.0);
    assert!(out.loss < 0.05);
}

#[test]
fn forward_decodes_split_and_merge() {
    let batch = small_batch();
    let loss = SuperVoxelAffinityLoss::new(LossConfig::default()).unwrap();
    let out = loss
        .forward(&Located::host(batch.pred_affs.clone()), &Located::host(batch.target_labels.clone()))
        .unwrap();
    assert_abs_diff_eq!(out.stats.splits, 1.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(out.stats.merges, 1.0 / 3.0, epsilon = 1e-12);
    assert_eq!(out.terms.dim(), (3, 3));

    let labels = loss.decode_labels(batch.pred_affs.view()).unwrap();
    let (masks, stats) = loss.critical_masks(&labels, batch.target_labels.view()).unwrap();
    assert_eq!(stats, out.stats);
    assert!(masks.index_axis(Axis(0), 0).iter().all(|&m| m == 0.0));
}

#[test]
fn loss_is_deterministic() {
    let batch = small_batch();
    let loss = SuperVoxelAffinityLoss::new(config(Edge::unit_edges(), 0.7)).unwrap();
    let pred = Located::host(batch.pred_affs);
    let target = Located::host(batch.target_labels);
    let a = loss.forward(&pred, &target).unwrap();
    let b = loss.forward(&pred, &target).unwrap();
    assert_eq!(a.loss, b.loss);
    assert_eq!(a.terms, b.terms);
}

#[test]
fn custom_criterion_is_used() {
    let batch = small_batch();
    let edges = Edge::unit_edges();
    let expected = plain_loss(&batch.pred_affs, &batch.target_labels, &edges, &MseLoss);
    let loss = SuperVoxelAffinityLoss::new(config(edges, 0.0)).unwrap().with_criterion(Box::new(MseLoss));
    assert_eq!(loss.criterion_name(), "mse");
    let out = loss
        .forward(&Located::host(batch.pred_affs), &Located::host(batch.target_labels))
        .unwrap();
    assert_abs_diff_eq!(out.loss, expected, epsilon = 1e-4);
}

#[test]
fn accelerator_tagged_inputs_are_accepted() {
    let batch = small_batch();
    let mut cfg = config(Edge::unit_edges(), 0.5);
    cfg.device = Device::Cuda(0);
    let loss = SuperVoxelAffinityLoss::new(cfg).unwrap();
    let on_host = SuperVoxelAffinityLoss::new(config(Edge::unit_edges(), 0.5)).unwrap();

    let out = loss
        .forward(
            &Located::new(batch.pred_affs.clone(), Device::Cuda(0)),
            &Located::new(batch.target_labels.clone(), Device::Cuda(0)),
        )
        .unwrap();
    let reference = on_host
        .forward(&Located::host(batch.pred_affs), &Located::host(batch.target_labels))
        .unwrap();
    assert_eq!(out.loss, reference.loss);
}
