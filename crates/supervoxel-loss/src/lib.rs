//! # Supervoxel affinity loss
//!
//! A topology-aware training loss for models that predict voxel affinities
//! for 3-D instance segmentation. Plain affinity losses weight every voxel
//! equally, even though a handful of wrong voxels can split or merge whole
//! objects. This crate finds those voxels (critical components) and upweights
//! the loss on them.
//!
//! ## Architecture
//!
//! ```text
//! pred_affs [B,E,H,W,D] ──► LabelDecoder (binarize + Watershed) ──► pred labels
//!                                                                     │
//! target labels [B,H,W,D] ───────────────────────────────┬────────────┤
//!                                                          ▼            ▼
//!                                  CriticalMaskComputer (split + merge, worker pool)
//!                                                          │
//!                                           critical mask [B,H,W,D], stats
//!                                                          │
//! AffinityChannelDecoder / affinity() ──► ElementwiseLoss ─┴─► weighted sum
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use supervoxel_loss::config::LossConfig;
//! use supervoxel_loss::device::Located;
//! use supervoxel_loss::loss::SuperVoxelAffinityLoss;
//! use supervoxel_loss::synthetic::{SyntheticBatch, SyntheticConfig};
//!
//! let loss = SuperVoxelAffinityLoss::new(LossConfig::default()).unwrap();
//! let batch = SyntheticBatch::generate(&SyntheticConfig::default()).unwrap();
//!
//! let out = loss
//!     .forward(&Located::host(batch.pred_affs), &Located::host(batch.target_labels))
//!     .unwrap();
//! println!("loss = {:.4}, splits = {}, merges = {}", out.loss, out.stats.splits, out.stats.merges);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod affinity;
pub mod config;
pub mod critical;
pub mod decoder;
pub mod device;
pub mod elementwise;
pub mod error;
pub mod loss;
pub mod masks;
pub mod synthetic;
pub mod volume_io;
pub mod watershed;

// Convenient re-exports at the crate root.
pub use affinity::{affinity, affinity_volume, extract, AffinityChannelDecoder, Edge};
pub use config::LossConfig;
pub use critical::{CriticalComponents, CriticalDetector, CriticalKind, TopologicalCriticalDetector};
pub use decoder::LabelDecoder;
pub use device::{Device, Located};
pub use elementwise::{BceWithLogitsLoss, CriterionKind, ElementwiseLoss, MseLoss};
pub use error::{ConfigError, DetectError, LossError, LossResult, ShapeError, VolumeIoError, WatershedError};
pub use loss::{LossOutput, SuperVoxelAffinityLoss};
pub use masks::{CriticalMaskComputer, CriticalStats};
pub use watershed::{ConnectedComponentsWatershed, LabelVolume, Watershed};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
