//! Integration tests for [`supervoxel_loss::config`].
//!
//! All tests use temporary directories; nothing is written to the source tree.

use supervoxel_loss::affinity::Edge;
use supervoxel_loss::config::LossConfig;
use supervoxel_loss::device::Device;
use supervoxel_loss::elementwise::CriterionKind;
use supervoxel_loss::error::ConfigError;
use supervoxel_loss::loss::SuperVoxelAffinityLoss;
use tempfile::tempdir;

#[test]
fn json_layout_is_stable() {
    let mut cfg = LossConfig::with_edges(vec![Edge::new(1, 0, 0), Edge::new(0, 0, -2)]);
    cfg.device = Device::Cuda(2);
    let json = serde_json::to_value(&cfg).unwrap();
    assert_eq!(json["edges"], serde_json::json!([[1, 0, 0], [0, 0, -2]]));
    assert_eq!(json["device"], serde_json::json!({ "cuda": 2 }));
    assert_eq!(json["criterion"], "bce_with_logits");
    assert_eq!(json["return_cnts"], false);
}

#[test]
fn file_config_builds_a_loss() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("loss.json");
    std::fs::write(
        &path,
        r#"{
            "edges": [[1, 0, 0], [0, 1, 0]],
            "alpha": 0.25,
            "beta": 0.75,
            "criterion": "mse",
            "device": "cpu",
            "num_workers": 2,
            "return_cnts": true
        }"#,
    )
    .unwrap();
    let cfg = LossConfig::from_json(&path).unwrap();
    assert_eq!(cfg.criterion, CriterionKind::Mse);
    assert_eq!(cfg.device, Device::Cpu);

    let loss = SuperVoxelAffinityLoss::new(cfg).unwrap();
    assert_eq!(loss.edges().len(), 2);
    assert_eq!(loss.criterion_name(), "mse");
}

#[test]
fn invalid_file_config_is_rejected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("loss.json");
    std::fs::write(&path, r#"{ "alpha": 2.0 }"#).unwrap();
    assert!(matches!(
        LossConfig::from_json(&path),
        Err(ConfigError::InvalidValue { field: "alpha", .. })
    ));
}

#[test]
fn missing_file_is_reported() {
    let tmp = tempdir().unwrap();
    assert!(matches!(
        LossConfig::from_json(&tmp.path().join("absent.json")),
        Err(ConfigError::FileRead { .. })
    ));
}

#[test]
fn invalid_config_never_builds_a_loss() {
    let mut cfg = LossConfig::default();
    cfg.merge_thresholds.clear();
    assert!(SuperVoxelAffinityLoss::new(cfg).is_err());
}
