// ============================================================
// Layer 3 — Training Configuration
// ============================================================
// Every knob of a training run, in one immutable struct.
//
// The CLI layer builds a TrainingConfig from flags, then
// calls validate() once. After that nothing mutates it:
// the trainer, the loader and the coordinator only read it.
//
// Serialisable so the resolved config can be logged as JSON
// at startup (useful when comparing logs from many ranks).
//
// Reference: Rust Book §5 (Structs), §6 (Enums)

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

use crate::domain::error::{TrainError, TrainResult};

// ─── Backend ──────────────────────────────────────────────────────────────────
/// The collective-communication transport requested on the command line.
///
/// `Nccl` stands for "accelerator transport": it is only honoured when an
/// accelerator is actually present, otherwise the coordinator falls back to
/// `Gloo` (CPU) with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gloo,
    Nccl,
}

impl Backend {
    pub fn needs_accelerator(self) -> bool {
        matches!(self, Backend::Nccl)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Gloo => f.write_str("gloo"),
            Backend::Nccl => f.write_str("nccl"),
        }
    }
}

// ─── DatasetSplit ─────────────────────────────────────────────────────────────
/// Which MNIST split to train on. Defaults to the 10k `test` split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Test,
}

impl DatasetSplit {
    /// IDX file prefix used by the MNIST distribution
    pub fn file_prefix(self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Test  => "t10k",
        }
    }
}

// ─── TrainingConfig ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs:        usize,
    pub save_every:    usize,
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub dataset_path:  PathBuf,
    pub snapshot_path: PathBuf,
    pub backend:       Backend,
    pub split:         DatasetSplit,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs:        1,
            save_every:    1,
            batch_size:    64,
            learning_rate: 1e-3,
            dataset_path:  PathBuf::from("../data"),
            snapshot_path: PathBuf::from("snapshot_mnist.pt"),
            backend:       Backend::Nccl,
            split:         DatasetSplit::Test,
        }
    }
}

impl TrainingConfig {
    /// Reject values that would make the epoch loop meaningless.
    /// Returns the config unchanged so it can be chained.
    pub fn validate(self) -> TrainResult<Self> {
        if self.epochs == 0 {
            return Err(TrainError::config("--epochs must be greater than 0"));
        }
        if self.save_every == 0 {
            return Err(TrainError::config("--save_every must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(TrainError::config("--batch_size must be greater than 0"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::config(format!(
                "--lr must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(TrainError::config("--snapshot_path must not be empty"));
        }
        Ok(self)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let cfg = TrainingConfig { epochs: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(TrainError::Configuration(_))));
    }

    #[test]
    fn test_zero_save_every_rejected() {
        let cfg = TrainingConfig { save_every: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_positive_lr_rejected() {
        let cfg = TrainingConfig { learning_rate: 0.0, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = TrainingConfig { learning_rate: f64::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_split_prefixes() {
        assert_eq!(DatasetSplit::Test.file_prefix(), "t10k");
        assert_eq!(DatasetSplit::Train.file_prefix(), "train");
    }
}
