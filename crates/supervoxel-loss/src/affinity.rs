//! Offset-based affinity extraction.
//!
//! An [`Edge`] is a 3-D integer offset `e`. Splitting it into
//! `offset1 = max(e, 0)` and `offset2 = max(-e, 0)` gives two windows over the
//! last three axes of a volume:
//!
//! ```text
//! sub_a = volume[offset1 : shape - offset2]
//! sub_b = volume[offset2 : shape - offset1]
//! ```
//!
//! Both windows have shape `shape - |e|`, and `sub_a[p]`, `sub_b[p]` are the
//! voxel pair `(q, q - e)` with `q = p + offset1`. The affinity map is
//! `(sub_a == sub_b) & (sub_a != 0)`.
//!
//! [`AffinityChannelDecoder`] applies the `sub_a` window to one channel of a
//! predicted affinity tensor so that predictions and targets line up voxel
//! for voxel.
//!
//! # Example
//!
//! ```rust
//! use ndarray::Array3;
//! use supervoxel_loss::affinity::{affinity, Edge};
//!
//! let labels = Array3::<u64>::from_elem((4, 4, 4), 7);
//! let aff = affinity(&labels, &Edge::new(1, 0, 0)).unwrap();
//! assert_eq!(aff.shape(), &[3, 4, 4]);
//! assert!(aff.iter().all(|&v| v == 1));
//! ```

use ndarray::{s, Array, Array4, ArrayBase, ArrayView, ArrayView3, ArrayView4, Axis, Data, Dimension, Slice, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ShapeError;

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A 3-D integer offset defining one affinity channel.
///
/// Serialized as a plain `[dx, dy, dz]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edge(pub [i64; 3]);

impl Edge {
    /// Create an edge from its three components.
    pub const fn new(dx: i64, dy: i64, dz: i64) -> Self {
        Edge([dx, dy, dz])
    }

    /// The three unit edges `(1,0,0)`, `(0,1,0)`, `(0,0,1)`.
    pub fn unit_edges() -> Vec<Edge> {
        vec![Edge::new(1, 0, 0), Edge::new(0, 1, 0), Edge::new(0, 0, 1)]
    }

    /// Split into `(max(e, 0), max(-e, 0))` componentwise.
    pub fn offsets(&self) -> ([usize; 3], [usize; 3]) {
        let mut positive = [0usize; 3];
        let mut negative = [0usize; 3];
        for k in 0..3 {
            let v = self.0[k];
            if v > 0 {
                positive[k] = v as usize;
            } else {
                negative[k] = v.unsigned_abs() as usize;
            }
        }
        (positive, negative)
    }

    /// Componentwise `|e|`.
    pub fn magnitude(&self) -> [usize; 3] {
        [
            self.0[0].unsigned_abs() as usize,
            self.0[1].unsigned_abs() as usize,
            self.0[2].unsigned_abs() as usize,
        ]
    }

    /// The opposite offset `-e`.
    pub fn reversed(&self) -> Edge {
        Edge([-self.0[0], -self.0[1], -self.0[2]])
    }

    /// `true` for the degenerate `(0, 0, 0)` offset.
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    /// Spatial shape of the window this edge leaves on a volume of `shape`.
    ///
    /// Returns `None` when the window would be empty or an offset exceeds an
    /// axis.
    pub fn window_shape(&self, shape: [usize; 3]) -> Option<[usize; 3]> {
        let m = self.magnitude();
        let mut out = [0usize; 3];
        for k in 0..3 {
            if m[k] >= shape[k] {
                return None;
            }
            out[k] = shape[k] - m[k];
        }
        Some(out)
    }
}

impl From<[i64; 3]> for Edge {
    fn from(v: [i64; 3]) -> Self {
        Edge(v)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

// ---------------------------------------------------------------------------
// Voxel element trait
// ---------------------------------------------------------------------------

/// Element types an affinity map can be computed over.
///
/// Affinities are cast back to the volume's own element type, so the trait
/// only needs the two constants `0` and `1`.
pub trait Voxel: Copy + PartialEq + Send + Sync {
    /// Background / "not connected".
    const ZERO: Self;
    /// "Connected".
    const ONE: Self;

    /// `true` when the value is the background id.
    #[inline]
    fn is_background(&self) -> bool {
        *self == Self::ZERO
    }
}

macro_rules! impl_voxel {
    ($($t:ty => $zero:expr, $one:expr);* $(;)?) => {
        $(
            impl Voxel for $t {
                const ZERO: Self = $zero;
                const ONE: Self = $one;
            }
        )*
    };
}

impl_voxel! {
    u8 => 0, 1;
    u16 => 0, 1;
    u32 => 0, 1;
    u64 => 0, 1;
    i32 => 0, 1;
    i64 => 0, 1;
    f32 => 0.0, 1.0;
    f64 => 0.0, 1.0;
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Check that `edge` fits the last three axes of `shape` and return the index
/// of the first spatial axis.
fn check_spatial(shape: &[usize], edge: &Edge) -> Result<usize, ShapeError> {
    let ndim = shape.len();
    if ndim < 3 {
        return Err(ShapeError::TooFewDims { ndim });
    }
    let first = ndim - 3;
    let magnitude = edge.magnitude();
    for k in 0..3 {
        let len = shape[first + k];
        if magnitude[k] > len {
            return Err(ShapeError::OffsetExceedsAxis { axis: k, offset: edge.0[k], len });
        }
    }
    Ok(first)
}

/// Restrict the last three axes of `view` to `[lo : len - hi]`.
fn window<'a, A, D: Dimension>(
    mut view: ArrayView<'a, A, D>,
    first: usize,
    lo: &[usize; 3],
    hi: &[usize; 3],
) -> ArrayView<'a, A, D> {
    view.slice_each_axis_inplace(|ax| {
        let i = ax.axis.index();
        if i < first {
            Slice::from(..)
        } else {
            let k = i - first;
            Slice::from(lo[k]..ax.len - hi[k])
        }
    });
    view
}

/// Slice `volume` twice using the edge as an offset.
///
/// Returns `(sub_a, sub_b)` with
/// `sub_a = volume[offset1 : shape - offset2]` and
/// `sub_b = volume[offset2 : shape - offset1]` over the last three axes.
/// Leading axes (batch, channel) are kept whole.
///
/// # Errors
///
/// [`ShapeError::TooFewDims`] if `volume` has fewer than three axes and
/// [`ShapeError::OffsetExceedsAxis`] if `|edge[k]|` exceeds the length of
/// spatial axis `k`.
pub fn extract<'a, A, D: Dimension>(
    volume: ArrayView<'a, A, D>,
    edge: &Edge,
) -> Result<(ArrayView<'a, A, D>, ArrayView<'a, A, D>), ShapeError> {
    let first = check_spatial(volume.shape(), edge)?;
    let (offset1, offset2) = edge.offsets();
    let sub_a = window(volume.clone(), first, &offset1, &offset2);
    let sub_b = window(volume, first, &offset2, &offset1);
    Ok((sub_a, sub_b))
}

/// The `sub_a` window of [`extract`] alone.
///
/// This is the window a predicted affinity channel is cropped to.
pub fn leading_window<'a, A, D: Dimension>(
    volume: ArrayView<'a, A, D>,
    edge: &Edge,
) -> Result<ArrayView<'a, A, D>, ShapeError> {
    let first = check_spatial(volume.shape(), edge)?;
    let (offset1, offset2) = edge.offsets();
    Ok(window(volume, first, &offset1, &offset2))
}

/// Binary "same nonzero label" affinity of `volume` at offset `edge`.
///
/// The result is cast to the volume's element type and has shape
/// `shape - |edge|` on the spatial axes.
pub fn affinity<A, S, D>(volume: &ArrayBase<S, D>, edge: &Edge) -> Result<Array<A, D>, ShapeError>
where
    A: Voxel,
    S: Data<Elem = A>,
    D: Dimension,
{
    let (sub_a, sub_b) = extract(volume.view(), edge)?;
    Ok(Zip::from(&sub_a).and(&sub_b).map_collect(|&a, &b| {
        if a == b && !a.is_background() {
            A::ONE
        } else {
            A::ZERO
        }
    }))
}

/// Full-grid affinity tensor `[E, H, W, D]` for a label volume.
///
/// Channel `c` holds the affinity map of `edges[c]` placed on its `sub_a`
/// window; voxels outside the window are zero. This is the layout a model is
/// expected to predict, so the result can be fed back through
/// [`AffinityChannelDecoder`] or the label decoder.
pub fn affinity_volume(labels: ArrayView3<'_, u64>, edges: &[Edge]) -> Result<Array4<f32>, ShapeError> {
    let (h, w, d) = labels.dim();
    let mut out = Array4::<f32>::zeros((edges.len(), h, w, d));
    for (c, edge) in edges.iter().enumerate() {
        let aff = affinity(&labels, edge)?;
        let (o1, o2) = edge.offsets();
        out.slice_mut(s![c, o1[0]..h - o2[0], o1[1]..w - o2[1], o1[2]..d - o2[2]])
            .zip_mut_with(&aff, |dst, &v| *dst = v as f32);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// AffinityChannelDecoder
// ---------------------------------------------------------------------------

/// Selects one channel of a predicted affinity tensor and crops it to the
/// window of the matching edge.
#[derive(Debug, Clone)]
pub struct AffinityChannelDecoder {
    edges: Vec<Edge>,
}

impl AffinityChannelDecoder {
    /// Create a decoder for the given channel → edge mapping.
    pub fn new(edges: Vec<Edge>) -> Self {
        AffinityChannelDecoder { edges }
    }

    /// The configured edges, in channel order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of channels the decoder expects.
    pub fn num_channels(&self) -> usize {
        self.edges.len()
    }

    /// Decode channel `index` of a `[E, H, W, D]` prediction.
    ///
    /// # Errors
    ///
    /// [`ShapeError::ChannelCountMismatch`] if `E` differs from the number of
    /// edges, [`ShapeError::EdgeIndexOutOfRange`] if `index >= E`, and the
    /// [`extract`] errors for the window itself.
    pub fn decode<'a>(
        &self,
        affinities: ArrayView4<'a, f32>,
        index: usize,
    ) -> Result<ArrayView3<'a, f32>, ShapeError> {
        let channels = affinities.len_of(Axis(0));
        if channels != self.edges.len() {
            return Err(ShapeError::ChannelCountMismatch { channels, edges: self.edges.len() });
        }
        if index >= channels {
            return Err(ShapeError::EdgeIndexOutOfRange { index, len: channels });
        }
        leading_window(affinities.index_axis_move(Axis(0), index), &self.edges[index])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
