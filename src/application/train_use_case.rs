// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one rank of a data-parallel training job, in order:
//
//   Step 1: Join the process group        (Layer 6 - infra)
//   Step 2: Read the MNIST split          (Layer 4 - data)
//   Step 3: Pick the Burn backend for the
//           resolved device               (this file)
//   Step 4: Build sampler + loader        (Layer 4 - data)
//   Step 5: Build model, optimizer, sync,
//           resume from snapshot          (Layer 5 - ml)
//   Step 6: Run the remaining epochs      (Layer 5 - ml)
//   Step 7: Tear down the process group   (Layer 6 - infra)
//
// The process group is torn down on every path out of this
// function: explicitly on success, by Drop on error.
//
// Reference: Rust Book §10 (Generic Types), §15 (Drop)
//            Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};

use crate::data::{
    batcher::MnistBatcher,
    dataset::{MnistDataset, MnistItem},
    loader::PartitionedLoader,
    mnist::MnistReader,
    sampler::DistributedSampler,
};
use crate::domain::config::TrainingConfig;
use crate::infra::{
    device::{DeviceBinding, SystemProbe},
    launch_env::LaunchEnv,
    process_group::ProcessGroup,
    snapshot::SnapshotStore,
};
use crate::ml::{
    model::{Net, NetConfig},
    sync::AllReduceSync,
    trainer::{Trainer, TrainerSettings, TrainingReport},
};

type CpuBackend = Autodiff<NdArray<f32>>;

#[cfg(feature = "wgpu")]
type GpuBackend = Autodiff<burn::backend::Wgpu>;

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainingConfig,
    env:    LaunchEnv,
}

impl TrainUseCase {
    /// `config` must already be validated.
    pub fn new(config: TrainingConfig, env: LaunchEnv) -> Self {
        Self { config, env }
    }

    pub fn execute(&self) -> Result<TrainingReport> {
        let cfg = &self.config;

        // ── Step 1: Join the process group ────────────────────────────────────
        let mut group = ProcessGroup::initialize(cfg.backend, &self.env, &SystemProbe)
            .context("failed to initialize process group")?;

        tracing::info!(
            "Training config: {}",
            serde_json::to_string(cfg).unwrap_or_else(|_| format!("{cfg:?}"))
        );

        // ── Step 2: Read the dataset ──────────────────────────────────────────
        let items = MnistReader::new(&cfg.dataset_path)
            .read_split(cfg.split)
            .with_context(|| {
                format!("failed to read MNIST from '{}'", cfg.dataset_path.display())
            })?;
        tracing::info!("Loaded {} samples ({:?} split)", items.len(), cfg.split);

        // ── Steps 3–6: Train on the resolved device ───────────────────────────
        let report = match group.binding() {
            DeviceBinding::Cpu => train_on::<CpuBackend>(cfg, &mut group, items, NdArrayDevice::Cpu)?,

            #[cfg(feature = "wgpu")]
            DeviceBinding::Accelerator(index) => {
                let device = burn::backend::wgpu::WgpuDevice::DiscreteGpu(index);
                train_on::<GpuBackend>(cfg, &mut group, items, device)?
            }

            #[cfg(not(feature = "wgpu"))]
            DeviceBinding::Accelerator(index) => {
                anyhow::bail!("accelerator {index} selected but built without the `wgpu` feature")
            }
        };

        // ── Step 7: Tear down ─────────────────────────────────────────────────
        group.teardown().context("failed to tear down process group")?;

        tracing::info!(
            "Run finished: {} epoch(s) executed, {} snapshot(s) written, epochs_run={}",
            report.epochs_executed.len(),
            report.snapshots_written.len(),
            report.final_epochs_run
        );
        Ok(report)
    }
}

/// Build the Burn side of the run for backend `B` and train it.
fn train_on<B: AutodiffBackend>(
    cfg:    &TrainingConfig,
    group:  &mut ProcessGroup,
    items:  Vec<MnistItem>,
    device: B::Device,
) -> Result<TrainingReport> {
    let identity = group.identity();
    let device_kind = group.binding().kind();

    let loader = PartitionedLoader::<B>::new(
        MnistDataset::new(items),
        Box::new(DistributedSampler::new(identity.global_rank(), identity.world_size())),
        MnistBatcher::new(device.clone()),
        cfg.batch_size,
    );

    let model = NetConfig::new().init::<B>(&device);
    let optimizer = AdamConfig::new().init::<B, Net<B>>();
    let sync = AllReduceSync::new(group.collective_mut());

    let settings = TrainerSettings {
        save_every:    cfg.save_every,
        learning_rate: cfg.learning_rate,
        device_kind,
    };

    let mut trainer = Trainer::new(
        model,
        optimizer,
        loader,
        sync,
        SnapshotStore::new(&cfg.snapshot_path),
        identity,
        &device,
        settings,
    )
    .with_context(|| format!("failed to prepare trainer (snapshot '{}')", cfg.snapshot_path.display()))?;

    let report = trainer.train(cfg.epochs)?;
    Ok(report)
}
