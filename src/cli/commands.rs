// ============================================================
// Layer 1 — CLI Arguments
// ============================================================
// The flags of a training run. Flag names keep their
// underscores (--save_every, --batch_size, …) so existing
// launch scripts work unchanged.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing or malformed flags
//   - type conversion (string → usize, f64, enum variants, …)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, ValueEnum};
use std::path::PathBuf;

use crate::domain::config::{Backend, DatasetSplit, TrainingConfig};

/// All arguments for a training run.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Total epochs to train for (including epochs already run before a resume)
    #[arg(long)]
    pub epochs: usize,

    /// Write a snapshot after every epoch whose index is a multiple of this
    #[arg(long = "save_every")]
    pub save_every: usize,

    /// Per-rank batch size
    #[arg(long = "batch_size", default_value_t = 64)]
    pub batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Directory holding the MNIST IDX files (or MNIST/raw/ beneath it)
    #[arg(long = "dataset_path", default_value = "../data")]
    pub dataset_path: PathBuf,

    /// Snapshot file used for resume; its directory is created if missing
    #[arg(long = "snapshot_path", default_value = "snapshot_mnist.pt")]
    pub snapshot_path: PathBuf,

    /// Collective transport: nccl (accelerator) or gloo (CPU).
    /// nccl falls back to gloo when no accelerator is present.
    #[arg(long, value_enum, default_value_t = BackendArg::Nccl)]
    pub backend: BackendArg,

    /// MNIST split to train on
    #[arg(long, value_enum, default_value_t = SplitArg::Test)]
    pub split: SplitArg,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendArg {
    /// CPU transport
    Gloo,
    /// Accelerator transport
    Nccl,
}

impl From<BackendArg> for Backend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Gloo => Backend::Gloo,
            BackendArg::Nccl => Backend::Nccl,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitArg {
    /// 60k training images
    Train,
    /// 10k test images
    Test,
}

impl From<SplitArg> for DatasetSplit {
    fn from(s: SplitArg) -> Self {
        match s {
            SplitArg::Train => DatasetSplit::Train,
            SplitArg::Test  => DatasetSplit::Test,
        }
    }
}

/// Convert CLI TrainArgs into the domain TrainingConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainingConfig {
    fn from(a: TrainArgs) -> Self {
        TrainingConfig {
            epochs:        a.epochs,
            save_every:    a.save_every,
            batch_size:    a.batch_size,
            learning_rate: a.lr,
            dataset_path:  a.dataset_path,
            snapshot_path: a.snapshot_path,
            backend:       a.backend.into(),
            split:         a.split.into(),
        }
    }
}
