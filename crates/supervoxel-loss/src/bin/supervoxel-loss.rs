//! `supervoxel-loss` binary: evaluates the loss on `.npy` volumes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin supervoxel-loss -- --pred pred.npy --target labels.npy
//! cargo run --bin supervoxel-loss -- --config loss.json --dry-run --json
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use supervoxel_loss::config::LossConfig;
use supervoxel_loss::device::Located;
use supervoxel_loss::loss::SuperVoxelAffinityLoss;
use supervoxel_loss::synthetic::{SyntheticBatch, SyntheticConfig};
use supervoxel_loss::volume_io::{load_pred_affinities, load_target_labels, save_critical_mask};
use supervoxel_loss::{ConfigError, LossResult};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "supervoxel-loss",
    version,
    about = "Topology-aware supervoxel affinity loss",
    long_about = None
)]
struct Args {
    /// Path to a JSON `LossConfig`. Defaults are used when absent.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// `[B, E, H, W, D]` float32 predicted affinities (`.npy`).
    #[arg(long, value_name = "FILE", required_unless_present = "dry_run")]
    pred: Option<PathBuf>,

    /// `[B, H, W, D]` integer target labels (`.npy`).
    #[arg(long, value_name = "FILE", required_unless_present = "dry_run")]
    target: Option<PathBuf>,

    /// Evaluate a deterministic synthetic batch instead of files.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Write the `[B, H, W, D]` critical mask to this `.npy` file.
    #[arg(long, value_name = "FILE")]
    mask_out: Option<PathBuf>,

    /// Print the result as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("supervoxel-loss v{}", supervoxel_loss::VERSION);

    let config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match LossConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => LossConfig::default(),
    };

    if let Err(e) = run(&args, config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: LossConfig) -> LossResult<()> {
    let (pred, target) = if args.dry_run {
        info!("DRY RUN: using a synthetic batch");
        let batch = SyntheticBatch::generate(&SyntheticConfig {
            edges: config.edges.clone(),
            ..SyntheticConfig::default()
        })?;
        (batch.pred_affs, batch.target_labels)
    } else {
        let (Some(pred_path), Some(target_path)) = (args.pred.as_deref(), args.target.as_deref()) else {
            return Err(ConfigError::invalid_value("--pred/--target", "both are required without --dry-run").into());
        };
        (load_pred_affinities(pred_path)?, load_target_labels(target_path)?)
    };
    info!("pred {:?}, target {:?}", pred.shape(), target.shape());

    let device = config.device;
    let loss = SuperVoxelAffinityLoss::new(config)?;
    let pred = Located::new(pred, device);
    let target = Located::new(target, device);

    let out = loss.forward(&pred, &target)?;

    if let Some(path) = args.mask_out.as_deref() {
        save_critical_mask(path, &out.masks)?;
        info!("Critical mask written to {}", path.display());
    }

    if args.json {
        let report = serde_json::json!({
            "loss": out.loss,
            "stats": out.stats,
            "terms": out.terms.outer_iter().map(|row| row.to_vec()).collect::<Vec<_>>(),
        });
        println!("{report}");
    } else {
        println!("loss   : {:.6}", out.loss);
        println!("splits : {:.3}", out.stats.splits);
        println!("merges : {:.3}", out.stats.merges);
    }
    Ok(())
}
