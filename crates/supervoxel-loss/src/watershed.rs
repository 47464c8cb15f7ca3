//! Affinity-graph labeling.
//!
//! The [`Watershed`] trait is the seam to whatever algorithm turns an affinity
//! graph into instance labels. It yields a lazy, finite sequence of
//! segmentations ordered from finest to coarsest; the label decoder only ever
//! takes the first one.
//!
//! [`ConnectedComponentsWatershed`] is the built-in implementation. For each
//! merge threshold `t` (ascending) it joins every voxel pair whose affinity
//! satisfies `1 - aff <= t` and labels the resulting components. Voxels that
//! are not joined to anything are background.

use ndarray::{Array3, ArrayView4, Axis};
use tracing::trace;

use crate::affinity::Edge;
use crate::error::{ShapeError, WatershedError};

/// Instance labels; `0` is background.
pub type LabelVolume = Array3<u64>;

/// Lazy sequence of segmentations, finest first.
pub type SegmentationIter<'a> = Box<dyn Iterator<Item = Result<LabelVolume, WatershedError>> + 'a>;

/// Turns a `[E, H, W, D]` affinity volume into instance labels.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// by the loss across calls.
pub trait Watershed: Send + Sync {
    /// Start a segmentation sequence over `affinities`.
    ///
    /// Voxels that end up unlabeled receive the first id of `background_ids`
    /// (or `0` when the list is empty); no object is ever given one of those
    /// ids. Calling `run` again restarts the sequence from the finest level.
    fn run<'a>(
        &'a self,
        affinities: ArrayView4<'a, f32>,
        background_ids: &[u64],
    ) -> Result<SegmentationIter<'a>, WatershedError>;
}

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect(), size: vec![1; n] }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

// ---------------------------------------------------------------------------
// ConnectedComponentsWatershed
// ---------------------------------------------------------------------------

/// Connected components of the thresholded affinity graph.
///
/// Channel `c` of the input connects voxel `q` with `q - edges[c]`, matching
/// the layout produced by [`crate::affinity::affinity_volume`].
#[derive(Debug, Clone)]
pub struct ConnectedComponentsWatershed {
    edges: Vec<Edge>,
    merge_thresholds: Vec<f32>,
}

impl ConnectedComponentsWatershed {
    /// Single-level labeling (merge threshold `0`).
    pub fn new(edges: Vec<Edge>) -> Self {
        Self::with_thresholds(edges, vec![0.0])
    }

    /// One segmentation per merge threshold, sorted ascending.
    pub fn with_thresholds(edges: Vec<Edge>, mut merge_thresholds: Vec<f32>) -> Self {
        merge_thresholds.sort_by(|a, b| a.total_cmp(b));
        ConnectedComponentsWatershed { edges, merge_thresholds }
    }

    /// The configured edges, in channel order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Concrete, restartable form of [`Watershed::run`].
    pub fn segmentations<'a>(
        &'a self,
        affinities: ArrayView4<'a, f32>,
        background_ids: &[u64],
    ) -> Result<Segmentations<'a>, WatershedError> {
        let channels = affinities.len_of(Axis(0));
        if channels != self.edges.len() {
            return Err(ShapeError::ChannelCountMismatch { channels, edges: self.edges.len() }.into());
        }
        let (_, h, w, d) = affinities.dim();
        let shape = [h, w, d];
        for edge in &self.edges {
            let m = edge.magnitude();
            for k in 0..3 {
                if m[k] > shape[k] {
                    return Err(ShapeError::OffsetExceedsAxis { axis: k, offset: edge.0[k], len: shape[k] }.into());
                }
            }
        }
        Ok(Segmentations {
            watershed: self,
            affinities,
            background_ids: background_ids.to_vec(),
            cursor: 0,
        })
    }

    fn label_at(
        &self,
        affinities: &ArrayView4<'_, f32>,
        threshold: f32,
        background_ids: &[u64],
    ) -> Result<LabelVolume, WatershedError> {
        let (_, h, w, d) = affinities.dim();
        let index = |x: usize, y: usize, z: usize| (x * w + y) * d + z;
        let n = h * w * d;
        let mut sets = UnionFind::new(n);
        let mut joined = vec![false; n];

        for (c, edge) in self.edges.iter().enumerate() {
            let (o1, o2) = edge.offsets();
            let channel = affinities.index_axis(Axis(0), c);
            for x in o1[0]..h - o2[0] {
                for y in o1[1]..w - o2[1] {
                    for z in o1[2]..d - o2[2] {
                        if 1.0 - channel[[x, y, z]] > threshold {
                            continue;
                        }
                        // q - e, always inside the window by construction
                        let px = (x + o2[0]) - o1[0];
                        let py = (y + o2[1]) - o1[1];
                        let pz = (z + o2[2]) - o1[2];
                        let q = index(x, y, z);
                        let p = index(px, py, pz);
                        sets.union(q, p);
                        joined[q] = true;
                        joined[p] = true;
                    }
                }
            }
        }

        let background = background_ids.first().copied().unwrap_or(0);
        let mut root_label = vec![None::<u64>; n];
        let mut next = 0u64;
        let mut assigned = 0usize;
        let mut labels = Array3::<u64>::from_elem((h, w, d), background);
        for ((x, y, z), out) in labels.indexed_iter_mut() {
            let q = index(x, y, z);
            if !joined[q] {
                continue;
            }
            let root = sets.find(q);
            let label = match root_label[root] {
                Some(l) => l,
                None => {
                    loop {
                        next = next
                            .checked_add(1)
                            .ok_or(WatershedError::LabelOverflow { assigned })?;
                        if !background_ids.contains(&next) {
                            break;
                        }
                    }
                    assigned += 1;
                    root_label[root] = Some(next);
                    next
                }
            };
            *out = label;
        }
        trace!(threshold, objects = assigned, "labeled affinity graph");
        Ok(labels)
    }
}

impl Watershed for ConnectedComponentsWatershed {
    fn run<'a>(
        &'a self,
        affinities: ArrayView4<'a, f32>,
        background_ids: &[u64],
    ) -> Result<SegmentationIter<'a>, WatershedError> {
        Ok(Box::new(self.segmentations(affinities, background_ids)?))
    }
}

/// Lazy segmentation sequence of a [`ConnectedComponentsWatershed`].
///
/// Each call to `next` labels the graph at the next merge threshold; nothing
/// is computed ahead of time.
pub struct Segmentations<'a> {
    watershed: &'a ConnectedComponentsWatershed,
    affinities: ArrayView4<'a, f32>,
    background_ids: Vec<u64>,
    cursor: usize,
}

impl<'a> Segmentations<'a> {
    /// Rewind to the finest segmentation.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Number of levels not yet produced.
    pub fn remaining(&self) -> usize {
        self.watershed.merge_thresholds.len() - self.cursor
    }
}

impl<'a> Iterator for Segmentations<'a> {
    type Item = Result<LabelVolume, WatershedError>;

    fn next(&mut self) -> Option<Self::Item> {
        let threshold = *self.watershed.merge_thresholds.get(self.cursor)?;
        self.cursor += 1;
        Some(self.watershed.label_at(&self.affinities, threshold, &self.background_ids))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}
