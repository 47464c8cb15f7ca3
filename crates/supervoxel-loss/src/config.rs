//! Loss configuration.
//!
//! [`LossConfig`] is the constructor surface of
//! [`SuperVoxelAffinityLoss`](crate::loss::SuperVoxelAffinityLoss). It is
//! serializable via [`serde`] so experiments can keep it next to their
//! checkpoints.
//!
//! # Example
//!
//! ```rust
//! use supervoxel_loss::config::LossConfig;
//!
//! let cfg = LossConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.edges.len(), 3);
//! assert_eq!(cfg.alpha, 0.5);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::affinity::Edge;
use crate::device::Device;
use crate::elementwise::CriterionKind;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// LossConfig
// ---------------------------------------------------------------------------

/// Complete configuration of the supervoxel affinity loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Affinity offsets, one per model output channel, in channel order.
    ///
    /// Default: **[(1,0,0), (0,1,0), (0,0,1)]**.
    pub edges: Vec<Edge>,

    /// Voxel-level versus structure-level weighting. `0` is a plain affinity
    /// loss, `1` counts only critical voxels. Default: **0.5**.
    pub alpha: f64,

    /// Split versus merge weighting inside the critical mask. Default: **0.5**.
    pub beta: f64,

    /// Binarization cutoff applied to predictions before label decoding.
    /// Default: **0.5**.
    pub threshold: f32,

    /// Element-wise criterion. Default: **BCE with logits**.
    pub criterion: CriterionKind,

    /// Device predictions arrive on and the loss is accumulated on.
    /// Default: **cpu**.
    pub device: Device,

    /// Accepted for compatibility; stats are always returned.
    pub return_cnts: bool,

    /// Critical-detection worker threads, `0` = one per core. Default: **0**.
    pub num_workers: usize,

    /// Merge thresholds of the built-in watershed, finest first.
    /// Default: **[0.0]**.
    pub merge_thresholds: Vec<f32>,
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig {
            edges: Edge::unit_edges(),
            alpha: 0.5,
            beta: 0.5,
            threshold: 0.5,
            criterion: CriterionKind::BceWithLogits,
            device: Device::Cpu,
            return_cnts: false,
            num_workers: 0,
            merge_thresholds: vec![0.0],
        }
    }
}

impl LossConfig {
    /// Default configuration with the given edges.
    pub fn with_edges(edges: Vec<Edge>) -> Self {
        LossConfig { edges, ..Self::default() }
    }

    /// Load a [`LossConfig`] from a JSON file at `path` and validate it.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: LossConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON, creating parent
    /// directories if necessary.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileRead`] if the directory or file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Validate all fields and return the first problem found.
    ///
    /// # Validated invariants
    ///
    /// - At least one edge, and no edge equal to `(0, 0, 0)`.
    /// - `alpha` and `beta` in `[0, 1]`.
    /// - `threshold` in `(0, 1)`.
    /// - At least one merge threshold, each finite and in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edges.is_empty() {
            return Err(ConfigError::invalid_value("edges", "at least one edge is required"));
        }
        if let Some(i) = self.edges.iter().position(Edge::is_zero) {
            return Err(ConfigError::invalid_value("edges", format!("edge {i} is the zero offset")));
        }

        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::invalid_value("alpha", "must be in [0.0, 1.0]"));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(ConfigError::invalid_value("beta", "must be in [0.0, 1.0]"));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ConfigError::invalid_value("threshold", "must be in (0.0, 1.0)"));
        }

        if self.merge_thresholds.is_empty() {
            return Err(ConfigError::invalid_value("merge_thresholds", "at least one threshold is required"));
        }
        if self.merge_thresholds.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(ConfigError::invalid_value("merge_thresholds", "each threshold must be in [0.0, 1.0]"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        LossConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("loss.json");

        let mut original = LossConfig::with_edges(vec![Edge::new(1, 0, 0), Edge::new(0, -3, 0)]);
        original.device = Device::Cuda(1);
        original.criterion = CriterionKind::Mse;
        original.to_json(&path).expect("serialization should succeed");

        let loaded = LossConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("loss.json");
        std::fs::write(&path, r#"{ "edges": [[2, 0, 0]], "alpha": 0.0 }"#).unwrap();
        let cfg = LossConfig::from_json(&path).unwrap();
        assert_eq!(cfg.edges, vec![Edge::new(2, 0, 0)]);
        assert_eq!(cfg.alpha, 0.0);
        assert_eq!(cfg.beta, 0.5);
        assert_eq!(cfg.threshold, 0.5);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("loss.json");
        std::fs::write(&path, "{ edges: ").unwrap();
        assert!(matches!(LossConfig::from_json(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn zero_edge_is_invalid() {
        let cfg = LossConfig::with_edges(vec![Edge::new(1, 0, 0), Edge::new(0, 0, 0)]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn no_edges_is_invalid() {
        assert!(LossConfig::with_edges(Vec::new()).validate().is_err());
    }

    #[test]
    fn alpha_and_beta_are_bounded() {
        let mut cfg = LossConfig::default();
        cfg.alpha = 1.2;
        assert!(cfg.validate().is_err());
        cfg.alpha = 1.0;
        cfg.beta = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn threshold_must_be_open_interval() {
        let mut cfg = LossConfig::default();
        cfg.threshold = 1.0;
        assert!(cfg.validate().is_err());
        cfg.threshold = 0.0;
        assert!(cfg.validate().is_err());
    }
}
