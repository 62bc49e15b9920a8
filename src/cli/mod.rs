// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses flags, validates them into a TrainingConfig and hands
// the run to Layer 2. One process of the job is started per
// rank by an external launcher, which also sets the rank
// environment variables read in Layer 6.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::TrainArgs;

use crate::domain::config::TrainingConfig;
use crate::infra::launch_env::LaunchEnv;

#[derive(Parser, Debug)]
#[command(
    name = "mnist-ddp",
    version,
    about = "Data-parallel MNIST training with snapshot/resume."
)]
pub struct Cli {
    #[command(flatten)]
    pub train: TrainArgs,
}

impl Cli {
    /// Validate, then run one rank of the training job.
    pub fn run(self) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        let config = TrainingConfig::from(self.train).validate()?;
        let report = TrainUseCase::new(config, LaunchEnv::from_process_env()).execute()?;

        if report.epochs_executed.is_empty() {
            println!("Nothing to train: {} epoch(s) already completed.", report.final_epochs_run);
        } else {
            println!("Training complete. Epochs run: {}", report.final_epochs_run);
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{Backend, DatasetSplit};

    #[test]
    fn test_defaults_applied() {
        let cli = Cli::try_parse_from(["mnist-ddp", "--epochs", "3", "--save_every", "1"]).unwrap();
        let cfg = TrainingConfig::from(cli.train);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.learning_rate, 0.001);
        assert_eq!(cfg.backend, Backend::Nccl);
        assert_eq!(cfg.split, DatasetSplit::Test);
        assert_eq!(cfg.snapshot_path, std::path::PathBuf::from("snapshot_mnist.pt"));
    }

    #[test]
    fn test_underscore_flags_parse() {
        let cli = Cli::try_parse_from([
            "mnist-ddp", "--epochs", "2", "--save_every", "2", "--batch_size", "16",
            "--dataset_path", "/tmp/mnist", "--backend", "gloo", "--split", "train",
        ])
        .unwrap();
        let cfg = TrainingConfig::from(cli.train);
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.backend, Backend::Gloo);
        assert_eq!(cfg.split, DatasetSplit::Train);
    }

    #[test]
    fn test_required_flags_enforced() {
        assert!(Cli::try_parse_from(["mnist-ddp", "--epochs", "3"]).is_err());
        assert!(Cli::try_parse_from(["mnist-ddp", "--save_every", "1"]).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let r = Cli::try_parse_from([
            "mnist-ddp", "--epochs", "1", "--save_every", "1", "--backend", "mpi",
        ]);
        assert!(r.is_err());
    }

    #[test]
    fn test_help_lists_backend_choices() {
        use clap::CommandFactory;

        let help = Cli::command().render_help().to_string();
        assert!(help.contains("gloo"));
        assert!(help.contains("nccl"));
    }
}
