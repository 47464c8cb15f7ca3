//! Error types for the supervoxel affinity loss.
//!
//! Every module that can fail imports its error type from here, keeping the
//! hierarchy in one place.
//!
//! ## Hierarchy
//!
//! ```text
//! LossError (top-level)
//! ├── ConfigError     (config validation / file loading)
//! ├── ShapeError      (sub-volume windows, channel layout, batch shapes)
//! ├── WatershedError  (affinity graph labeling)
//! ├── DetectError     (critical-component workers)
//! └── VolumeIoError   (.npy reading / writing)
//! ```
//!
//! Nothing in this crate retries. A wrong topology-weighted loss is worse
//! than an explicit failure, so every error aborts the forward call.

use std::path::PathBuf;
use thiserror::Error;

use crate::critical::CriticalKind;

// ---------------------------------------------------------------------------
// LossResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type LossResult<T> = Result<T, LossError>;

// ---------------------------------------------------------------------------
// LossError
// ---------------------------------------------------------------------------

/// Top-level error type returned by [`crate::loss::SuperVoxelAffinityLoss`].
///
/// Lower-level modules return their own error types, which are coerced into
/// `LossError` via [`From`].
#[derive(Debug, Error)]
pub enum LossError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A volume or channel layout did not match what the operation requires.
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    /// The watershed collaborator failed to label a prediction.
    #[error("Watershed error: {0}")]
    Watershed(#[from] WatershedError),

    /// A critical-detection worker failed; the whole batch is discarded.
    #[error("Critical detection error: {0}")]
    Detect(#[from] DetectError),

    /// Loading or saving a volume failed.
    #[error("Volume I/O error: {0}")]
    VolumeIo(#[from] VolumeIoError),

    /// The batch contains no examples.
    #[error("Batch is empty")]
    EmptyBatch,

    /// A buffer lives on a different device than the operation expects.
    #[error("Device mismatch for {buffer}: expected {expected}, found {actual}")]
    DeviceMismatch {
        /// Which input was misplaced.
        buffer: &'static str,
        /// Device the loss is configured for.
        expected: String,
        /// Device the buffer is tagged with.
        actual: String,
    },
}

impl LossError {
    /// Construct a [`LossError::DeviceMismatch`].
    pub fn device_mismatch(
        buffer: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        LossError::DeviceMismatch {
            buffer,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`LossConfig`].
///
/// [`LossConfig`]: crate::config::LossConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from or written to disk.
    #[error("Cannot access config file `{path}`: {source}")]
    FileRead {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The worker pool could not be created.
    #[error("Cannot build worker pool with {num_workers} threads: {reason}")]
    WorkerPool {
        /// Requested pool size (0 = one per core).
        num_workers: usize,
        /// Error reported by the pool builder.
        reason: String,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// ShapeError
// ---------------------------------------------------------------------------

/// Errors produced by offset windowing and channel selection.
///
/// These are programmer or configuration errors: they are raised before any
/// worker is dispatched and are never retried.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// The array has fewer than three spatial axes.
    #[error("Expected at least 3 spatial dimensions, got {ndim}")]
    TooFewDims {
        /// Number of axes of the offending array.
        ndim: usize,
    },

    /// An edge offset reaches past the end of a spatial axis.
    #[error("Offset {offset} on spatial axis {axis} exceeds axis length {len}")]
    OffsetExceedsAxis {
        /// Spatial axis index (0, 1 or 2).
        axis: usize,
        /// Offset component along that axis.
        offset: i64,
        /// Length of the axis.
        len: usize,
    },

    /// An edge window would contain no voxels.
    #[error("Edge {edge:?} leaves an empty window on a volume of shape {shape:?}")]
    EmptyWindow {
        /// The offending offset.
        edge: [i64; 3],
        /// Spatial shape of the volume.
        shape: [usize; 3],
    },

    /// The affinity tensor does not carry one channel per configured edge.
    #[error("Affinity tensor has {channels} channels but {edges} edges are configured")]
    ChannelCountMismatch {
        /// Channel count of the input.
        channels: usize,
        /// Number of configured edges.
        edges: usize,
    },

    /// An edge index is outside `[0, channel_count)`.
    #[error("Edge index {index} out of range for {len} channels")]
    EdgeIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of channels.
        len: usize,
    },

    /// A spatial axis is shorter than an operation requires.
    #[error("Spatial axis {axis} has length {len}, at least {min} required")]
    AxisTooShort {
        /// Spatial axis index (0, 1 or 2).
        axis: usize,
        /// Length of the axis.
        len: usize,
        /// Minimum length.
        min: usize,
    },

    /// Two arrays that must agree in shape do not.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Mismatch {
        /// Which pair of arrays disagreed.
        what: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },
}

impl ShapeError {
    /// Construct a [`ShapeError::Mismatch`].
    pub fn mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        ShapeError::Mismatch { what, expected: expected.to_vec(), actual: actual.to_vec() }
    }
}

// ---------------------------------------------------------------------------
// WatershedError
// ---------------------------------------------------------------------------

/// Errors produced while turning an affinity graph into instance labels.
#[derive(Debug, Error)]
pub enum WatershedError {
    /// The affinity volume does not match the watershed's edge layout.
    #[error("Invalid affinity layout: {0}")]
    Layout(#[from] ShapeError),

    /// The watershed produced no segmentation at all.
    #[error("Watershed produced an empty segmentation sequence")]
    EmptySequence,

    /// The label space was exhausted while skipping background ids.
    #[error("Ran out of label ids after {assigned} assignments")]
    LabelOverflow {
        /// Number of labels handed out before overflowing.
        assigned: usize,
    },
}

// ---------------------------------------------------------------------------
// DetectError
// ---------------------------------------------------------------------------

/// Errors produced by critical-component detection workers.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Reference and candidate volumes disagree in shape.
    #[error("Reference shape {reference:?} does not match candidate shape {candidate:?}")]
    ShapeMismatch {
        /// Shape of the reference labels.
        reference: Vec<usize>,
        /// Shape of the candidate labels.
        candidate: Vec<usize>,
    },

    /// A worker task panicked.
    #[error("{kind} analysis for example {example} panicked: {message}")]
    WorkerPanicked {
        /// Batch index of the example.
        example: usize,
        /// Which analysis was running.
        kind: CriticalKind,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A detector reported a failure.
    #[error("{kind} analysis for example {example} failed: {message}")]
    Failed {
        /// Batch index of the example.
        example: usize,
        /// Which analysis was running.
        kind: CriticalKind,
        /// Description reported by the detector.
        message: String,
    },

    /// The detector returned a mask whose shape differs from its inputs.
    #[error("Detector returned mask of shape {actual:?}, expected {expected:?}")]
    MaskShape {
        /// Input volume shape.
        expected: Vec<usize>,
        /// Returned mask shape.
        actual: Vec<usize>,
    },
}

impl DetectError {
    /// Construct a [`DetectError::Failed`].
    pub fn failed<S: Into<String>>(example: usize, kind: CriticalKind, msg: S) -> Self {
        DetectError::Failed { example, kind, message: msg.into() }
    }
}

// ---------------------------------------------------------------------------
// VolumeIoError
// ---------------------------------------------------------------------------

/// Errors produced while reading or writing `.npy` volumes.
#[derive(Debug, Error)]
pub enum VolumeIoError {
    /// A low-level I/O error while accessing a file.
    #[error("I/O error accessing `{path}`: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be decoded as an array of a supported dtype.
    #[error("NumPy read error in `{path}`: {message}")]
    NpyRead {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// The array could not be written.
    #[error("NumPy write error in `{path}`: {message}")]
    NpyWrite {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// The array has the wrong number of axes.
    #[error("Expected a {expected}-D array in `{path}`, got shape {shape:?}")]
    Dimensionality {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// Expected number of axes.
        expected: usize,
        /// Actual shape.
        shape: Vec<usize>,
    },

    /// A label volume contains a negative id.
    #[error("Label volume `{path}` contains negative label {value}")]
    NegativeLabel {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// First negative value found.
        value: i64,
    },
}

impl VolumeIoError {
    /// Construct a [`VolumeIoError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeIoError::Io { path: path.into(), source }
    }

    /// Construct a [`VolumeIoError::NpyRead`].
    pub fn npy_read<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        VolumeIoError::NpyRead { path: path.into(), message: msg.into() }
    }
}
