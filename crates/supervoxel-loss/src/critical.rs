//! Critical-component detection.
//!
//! A critical component is a connected set of mislabeled voxels whose
//! mislabeling changes the topology of an object: removing it from a
//! reference object either separates the object in the candidate
//! segmentation or makes the object vanish. Running the detector with the
//! ground truth as reference finds false splits; swapping the arguments finds
//! false merges.
//!
//! # Reference detector
//!
//! [`TopologicalCriticalDetector`] works on label partitions only, so any
//! relabeling of the candidate is ignored:
//!
//! 1. A reference foreground voxel is a *mistake* when its candidate label is
//!    background, or when a 6-neighbour in the same reference object carries
//!    a different foreground candidate label.
//! 2. Mistakes are grouped into 6-connected components inside one reference
//!    object.
//! 3. A component is critical unless exactly one foreground candidate label
//!    occurs inside it and on the correctly labeled voxels of the same object
//!    that touch it. A one-voxel-thick fragment lies entirely inside the
//!    mistake band, so its label is only seen from the inside.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::error::DetectError;

/// Which way round an analysis was run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalKind {
    /// Ground truth as reference: finds objects broken apart by the prediction.
    Split,
    /// Prediction as reference: finds ground-truth objects fused together.
    Merge,
}

impl fmt::Display for CriticalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalKind::Split => write!(f, "split"),
            CriticalKind::Merge => write!(f, "merge"),
        }
    }
}

/// Output of one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalComponents {
    /// `1` on every voxel of a critical component, else `0`.
    pub mask: Array3<u8>,
    /// Number of critical components.
    pub count: usize,
}

impl CriticalComponents {
    /// No critical components on a volume of the given shape.
    pub fn empty(shape: (usize, usize, usize)) -> Self {
        CriticalComponents { mask: Array3::zeros(shape), count: 0 }
    }
}

/// Finds critical components of `candidate` relative to `reference`.
///
/// Detectors run concurrently on worker threads, one call per
/// (example, kind) pair, so they must be `Send + Sync` and must not rely on
/// shared mutable state.
pub trait CriticalDetector: Send + Sync {
    /// Detect critical components.
    ///
    /// # Errors
    ///
    /// [`DetectError::ShapeMismatch`] when the volumes differ in shape, or any
    /// detector-specific failure.
    fn detect(
        &self,
        reference: ArrayView3<'_, u64>,
        candidate: ArrayView3<'_, u64>,
    ) -> Result<CriticalComponents, DetectError>;
}

/// Flood-fill critical-component detector on 6-connected voxels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologicalCriticalDetector;

const NEIGHBOURS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

#[inline]
fn neighbour(v: [usize; 3], step: [isize; 3], shape: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for k in 0..3 {
        let n = v[k].checked_add_signed(step[k])?;
        if n >= shape[k] {
            return None;
        }
        out[k] = n;
    }
    Some(out)
}

impl TopologicalCriticalDetector {
    /// Mark mistake voxels (rule 1).
    fn mistakes(reference: &ArrayView3<'_, u64>, candidate: &ArrayView3<'_, u64>) -> Array3<bool> {
        let (h, w, d) = reference.dim();
        let shape = [h, w, d];
        Array3::from_shape_fn((h, w, d), |(x, y, z)| {
            let r = reference[[x, y, z]];
            if r == 0 {
                return false;
            }
            let c = candidate[[x, y, z]];
            if c == 0 {
                return true;
            }
            NEIGHBOURS.iter().any(|&step| {
                neighbour([x, y, z], step, shape).map_or(false, |n| {
                    reference[n] == r && candidate[n] != 0 && candidate[n] != c
                })
            })
        })
    }
}

impl CriticalDetector for TopologicalCriticalDetector {
    fn detect(
        &self,
        reference: ArrayView3<'_, u64>,
        candidate: ArrayView3<'_, u64>,
    ) -> Result<CriticalComponents, DetectError> {
        if reference.shape() != candidate.shape() {
            return Err(DetectError::ShapeMismatch {
                reference: reference.shape().to_vec(),
                candidate: candidate.shape().to_vec(),
            });
        }
        let (h, w, d) = reference.dim();
        let shape = [h, w, d];
        let mistakes = Self::mistakes(&reference, &candidate);

        let mut visited = Array3::<bool>::from_elem((h, w, d), false);
        let mut out = CriticalComponents::empty((h, w, d));
        let mut queue = VecDeque::new();
        let mut component = Vec::new();
        let mut seen = HashSet::new();

        for ((x, y, z), &is_mistake) in mistakes.indexed_iter() {
            if !is_mistake || visited[[x, y, z]] {
                continue;
            }
            let object = reference[[x, y, z]];
            component.clear();
            seen.clear();
            visited[[x, y, z]] = true;
            queue.push_back([x, y, z]);

            while let Some(v) = queue.pop_front() {
                component.push(v);
                if candidate[v] != 0 {
                    seen.insert(candidate[v]);
                }
                for &step in &NEIGHBOURS {
                    let Some(n) = neighbour(v, step, shape) else { continue };
                    if reference[n] != object {
                        continue;
                    }
                    if mistakes[n] {
                        if !visited[n] {
                            visited[n] = true;
                            queue.push_back(n);
                        }
                    } else if candidate[n] != 0 {
                        seen.insert(candidate[n]);
                    }
                }
            }

            if seen.len() != 1 {
                out.count += 1;
                for &v in &component {
                    out.mask[v] = 1;
                }
            }
        }
        Ok(out)
    }
}
