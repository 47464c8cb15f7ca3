//! Integration tests for [`supervoxel_loss::decoder`] and
//! [`supervoxel_loss::watershed`].
//!
//! Ground-truth labels are turned into perfect logits and decoded again; the
//! result must equal the input up to a relabeling.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{s, Array3, Array4};
use supervoxel_loss::affinity::Edge;
use supervoxel_loss::decoder::{LabelDecoder, BACKGROUND_IDS};
use supervoxel_loss::synthetic::{cut, prediction_logits, two_slabs};
use supervoxel_loss::watershed::{ConnectedComponentsWatershed, Watershed};

fn unit_decoder() -> LabelDecoder {
    LabelDecoder::new(0.5, Arc::new(ConnectedComponentsWatershed::new(Edge::unit_edges())))
}

/// Assert `a` and `b` are the same partition with background kept in place.
fn assert_same_partition(a: &Array3<u64>, b: &Array3<u64>) {
    let mut forward = HashMap::new();
    let mut backward = HashMap::new();
    for (&x, &y) in a.iter().zip(b.iter()) {
        assert_eq!(x == 0, y == 0, "background differs");
        if x == 0 {
            continue;
        }
        assert_eq!(*forward.entry(x).or_insert(y), y, "label {x} maps to two labels");
        assert_eq!(*backward.entry(y).or_insert(x), x, "label {y} maps to two labels");
    }
}

#[test]
fn two_slabs_round_trip() {
    let target = two_slabs((6, 6, 6));
    let logits = prediction_logits(target.view(), &Edge::unit_edges(), 8.0).unwrap();
    let decoded = unit_decoder().decode(logits.view()).unwrap();
    assert_same_partition(&target, &decoded);
    let mut ids: Vec<u64> = decoded.iter().copied().filter(|&v| v != 0).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn cut_object_decodes_into_two_pieces() {
    let target = two_slabs((8, 3, 3));
    let split = cut(target.view(), 0, 2);
    let logits = prediction_logits(split.view(), &Edge::unit_edges(), 8.0).unwrap();
    let decoded = unit_decoder().decode(logits.view()).unwrap();
    for (&x, &y) in split.iter().zip(decoded.iter()) {
        assert_eq!(x == 0, y == 0);
    }
    // object 1 now has two pieces, object 2 is untouched
    assert_ne!(decoded[[0, 0, 0]], decoded[[3, 0, 0]]);
    assert_ne!(decoded[[3, 0, 0]], decoded[[7, 0, 0]]);
    assert_eq!(decoded[[2, 1, 1]], 0);
}

#[test]
fn labels_follow_raster_order() {
    let mut target = Array3::<u64>::zeros((4, 4, 4));
    target.slice_mut(s![2.., .., ..]).fill(9);
    target.slice_mut(s![0..1, .., ..]).fill(3);
    let logits = prediction_logits(target.view(), &Edge::unit_edges(), 8.0).unwrap();
    let decoded = unit_decoder().decode(logits.view()).unwrap();
    assert_eq!(decoded[[0, 0, 0]], 1);
    assert_eq!(decoded[[3, 3, 3]], 2);
    assert_eq!(decoded[[1, 0, 0]], 0);
}

#[test]
fn decoding_is_deterministic() {
    let target = two_slabs((8, 4, 4));
    let logits = prediction_logits(target.view(), &Edge::unit_edges(), 8.0).unwrap();
    let decoder = unit_decoder();
    assert_eq!(decoder.decode(logits.view()).unwrap(), decoder.decode(logits.view()).unwrap());
}

#[test]
fn watershed_sequence_is_restartable_and_coarsens() {
    let target = two_slabs((6, 2, 2));
    let edges = Edge::unit_edges();
    let binary = prediction_logits(target.view(), &edges, 1.0).unwrap().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
    let ws = ConnectedComponentsWatershed::with_thresholds(edges, vec![1.0, 0.0]);

    let mut seq = ws.segmentations(binary.view(), &BACKGROUND_IDS).unwrap();
    assert_eq!(seq.remaining(), 2);
    let finest = seq.next().unwrap().unwrap();
    let coarsest = seq.next().unwrap().unwrap();
    assert!(seq.next().is_none());

    assert_same_partition(&target, &finest);
    // every pair joins at the coarsest level
    assert!(coarsest.iter().all(|&v| v == 1));

    seq.restart();
    assert_eq!(seq.next().unwrap().unwrap(), finest);

    let via_trait: Vec<_> = Watershed::run(&ws, binary.view(), &BACKGROUND_IDS)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(via_trait, vec![finest, coarsest]);
}

#[test]
fn all_background_prediction_decodes_to_zero() {
    let logits = Array4::<f32>::from_elem((3, 4, 4, 4), -5.0);
    let decoded = unit_decoder().decode(logits.view()).unwrap();
    assert!(decoded.iter().all(|&v| v == 0));
}
