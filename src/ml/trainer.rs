// ============================================================
// Layer 5 — Trainer
// ============================================================
// The epoch loop, written as a small state machine:
//
//   Idle(epochs_run = N)
//     │  for e in N..max_epochs
//     ▼
//   RunningEpoch(e)
//     1. reseed the partitioner with e
//     2. for every batch of this rank's partition:
//          forward → cross-entropy → backward
//          → synchronize_gradients (all-reduce mean)
//          → Adam step
//     3. epochs_run = e + 1
//        rank 0 and e % save_every == 0 → write snapshot
//     │
//     ▼
//   Idle(epochs_run = e + 1)  …  Terminal at max_epochs
//
// Burn computes fresh gradients on every backward() call, so
// there is no accumulator to zero between batches.
//
// Only rank 0 writes the snapshot, and nobody waits for it:
// the next epoch's first all-reduce brings the ranks back in
// step anyway.
//
// Reference: Burn Book §5 (Training), Kingma & Ba (2015) Adam

use burn::{
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{batcher::MnistBatch, loader::PartitionedLoader};
use crate::domain::error::TrainResult;
use crate::domain::identity::ProcessIdentity;
use crate::infra::snapshot::SnapshotStore;
use crate::ml::model::Net;
use crate::ml::sync::GradientSync;

#[derive(Debug, Clone, Copy)]
pub struct TrainerSettings {
    pub save_every:    usize,
    pub learning_rate: f64,
    /// "CPU" / "GPU", only used in log lines
    pub device_kind:   &'static str,
}

/// What a call to train() actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    /// Epoch indices executed by this call, in order
    pub epochs_executed:   Vec<usize>,
    /// Epoch indices after which this process wrote a snapshot
    pub snapshots_written: Vec<usize>,
    /// Epoch counter when the loop finished
    pub final_epochs_run:  usize,
    /// Mean training loss of each executed epoch
    pub epoch_losses:      Vec<f64>,
}

pub struct Trainer<B, O, S>
where
    B: AutodiffBackend,
    O: Optimizer<Net<B>, B>,
    S: GradientSync<B>,
{
    model:      Net<B>,
    optimizer:  O,
    loader:     PartitionedLoader<B>,
    sync:       S,
    store:      SnapshotStore,
    identity:   ProcessIdentity,
    settings:   TrainerSettings,
    epochs_run: usize,
}

impl<B, O, S> Trainer<B, O, S>
where
    B: AutodiffBackend,
    O: Optimizer<Net<B>, B>,
    S: GradientSync<B>,
{
    /// Build a trainer, resuming from the snapshot at `store` if one exists.
    ///
    /// Every rank loads the snapshot (reads are safe: no writer is active
    /// yet), then rank 0's parameters are broadcast so all replicas match.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model:     Net<B>,
        optimizer: O,
        loader:    PartitionedLoader<B>,
        mut sync:  S,
        store:     SnapshotStore,
        identity:  ProcessIdentity,
        device:    &B::Device,
        settings:  TrainerSettings,
    ) -> TrainResult<Self> {
        tracing::info!("Using device: {} (rank {})", settings.device_kind, identity.global_rank());

        store.ensure_parent_dir()?;

        let mut model = model;
        let mut epochs_run = 0;
        if store.exists() {
            tracing::info!("Loading snapshot from '{}'", store.path().display());
            let (restored, stored_epochs) = store.load::<B, _>(model, device)?;
            model = restored;
            epochs_run = stored_epochs;
            tracing::info!("Resuming training from snapshot. Epochs run: {}", epochs_run);
        }

        let model = sync.broadcast_parameters(model)?;

        Ok(Self { model, optimizer, loader, sync, store, identity, settings, epochs_run })
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn model(&self) -> &Net<B> {
        &self.model
    }

    /// Run epochs [epochs_run, max_epochs). An empty range does nothing.
    pub fn train(&mut self, max_epochs: usize) -> TrainResult<TrainingReport> {
        let mut report = TrainingReport::default();

        for epoch in self.epochs_run..max_epochs {
            let loss = self.run_epoch(epoch)?;
            self.epochs_run = epoch + 1;
            report.epochs_executed.push(epoch);
            report.epoch_losses.push(loss);

            if self.identity.is_snapshot_writer() && epoch % self.settings.save_every == 0 {
                self.save_snapshot(epoch)?;
                report.snapshots_written.push(epoch);
            }
        }

        report.final_epochs_run = self.epochs_run;
        if report.epochs_executed.is_empty() {
            tracing::info!(
                "Nothing to do: {} of {} epochs already completed",
                self.epochs_run, max_epochs
            );
        }
        Ok(report)
    }

    fn run_epoch(&mut self, epoch: usize) -> TrainResult<f64> {
        if self.loader.reshuffles_per_epoch() {
            self.loader.set_epoch(epoch);
        }

        tracing::info!(
            "[{}{}] Epoch {} | Batchsize: {} | Steps: {}",
            self.settings.device_kind,
            self.identity.global_rank(),
            epoch,
            self.loader.batch_size(),
            self.loader.num_batches(),
        );

        // Disjoint borrows so batches stream from the loader one at a time
        let Self { model, optimizer, loader, sync, settings, .. } = &mut *self;
        let mut loss_sum = 0.0f64;
        let mut steps = 0usize;
        for batch in loader.iter() {
            loss_sum += train_step(model, optimizer, sync, settings.learning_rate, batch)?;
            steps += 1;
        }

        let mean_loss = if steps > 0 { loss_sum / steps as f64 } else { f64::NAN };
        tracing::info!(
            "[{}{}] Epoch {} done | loss={:.4}",
            self.settings.device_kind,
            self.identity.global_rank(),
            epoch,
            mean_loss
        );
        Ok(mean_loss)
    }

    fn save_snapshot(&self, epoch: usize) -> TrainResult<()> {
        self.store.save::<B, _>(&self.model, self.epochs_run)?;
        tracing::info!(
            "Epoch {} | Training snapshot saved at {}",
            epoch,
            self.store.path().display()
        );
        Ok(())
    }
}

/// One optimizer step on one batch; returns the batch loss.
fn train_step<B, O, S>(
    model:         &mut Net<B>,
    optimizer:     &mut O,
    sync:          &mut S,
    learning_rate: f64,
    batch:         MnistBatch<B>,
) -> TrainResult<f64>
where
    B: AutodiffBackend,
    O: Optimizer<Net<B>, B>,
    S: GradientSync<B>,
{
    let loss = model.forward_loss(batch)?;
    let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();

    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &*model);
    let grads = sync.synchronize_gradients(&*model, grads)?;

    *model = optimizer.step(learning_rate, model.clone(), grads);
    Ok(loss_value)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        batcher::MnistBatcher,
        dataset::{MnistDataset, MnistItem, IMAGE_SIDE},
        sampler::{DistributedSampler, SequentialPartitioner},
    };
    use crate::domain::{config::Backend, error::TrainError, traits::Collective};
    use crate::infra::{
        collective::{ChannelCollective, LocalCollective},
        device::{DeviceBinding, SystemProbe},
        launch_env::{LaunchEnv, LOCAL_RANK, MASTER_ADDR, MASTER_PORT, RANK, WORLD_SIZE},
        process_group::ProcessGroup,
    };
    use crate::ml::{model::NetConfig, sync::AllReduceSync};
    use burn::{
        backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
        module::{Module, ModuleVisitor, ParamId},
        optim::AdamConfig,
    };
    use std::{path::Path, thread};

    type TestBackend = Autodiff<NdArray<f32>>;

    const DEVICE: NdArrayDevice = NdArrayDevice::Cpu;

    fn items(n: usize) -> Vec<MnistItem> {
        (0..n)
            .map(|i| MnistItem {
                pixels: (0..IMAGE_SIDE * IMAGE_SIDE).map(|p| ((p * (i + 1)) % 256) as u8).collect(),
                label:  (i % 10) as u8,
            })
            .collect()
    }

    fn loader(identity: ProcessIdentity, data: Vec<MnistItem>) -> PartitionedLoader<TestBackend> {
        PartitionedLoader::new(
            MnistDataset::new(data),
            Box::new(DistributedSampler::new(identity.global_rank(), identity.world_size())),
            MnistBatcher::new(DEVICE),
            2,
        )
    }

    fn settings(save_every: usize) -> TrainerSettings {
        TrainerSettings { save_every, learning_rate: 1e-3, device_kind: "CPU" }
    }

    /// Run a full training call on one rank with the given collective.
    fn run_rank(
        collective: &mut dyn Collective,
        identity:   ProcessIdentity,
        snapshot:   &Path,
        epochs:     usize,
        save_every: usize,
    ) -> TrainResult<(TrainingReport, Vec<f32>)> {
        let model = NetConfig::new().init::<TestBackend>(&DEVICE);
        let optimizer = AdamConfig::new().init::<TestBackend, Net<TestBackend>>();
        let mut trainer = Trainer::new(
            model,
            optimizer,
            loader(identity, items(8)),
            AllReduceSync::new(collective),
            SnapshotStore::new(snapshot),
            identity,
            &DEVICE,
            settings(save_every),
        )?;
        let report = trainer.train(epochs)?;
        Ok((report, flat_params(trainer.model())))
    }

    #[derive(Default)]
    struct Flatten(Vec<f32>);

    impl ModuleVisitor<TestBackend> for Flatten {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, t: &Tensor<TestBackend, D>) {
            self.0.extend(t.to_data().to_vec::<f32>().unwrap());
        }
    }

    fn flat_params(model: &Net<TestBackend>) -> Vec<f32> {
        let mut v = Flatten::default();
        model.visit(&mut v);
        v.0
    }

    fn stored_epochs(path: &Path) -> usize {
        let net = NetConfig::new().init::<TestBackend>(&DEVICE);
        SnapshotStore::new(path).load::<TestBackend, _>(net, &DEVICE).unwrap().1
    }

    #[test]
    fn test_snapshot_schedule_follows_save_every() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");

        let (report, _) =
            run_rank(&mut LocalCollective, ProcessIdentity::single(), &path, 5, 2).unwrap();

        assert_eq!(report.epochs_executed, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.snapshots_written, vec![0, 2, 4]);
        assert_eq!(stored_epochs(&path), 5);
        assert!(report.epoch_losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_non_zero_rank_never_writes() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        let identity = ProcessIdentity::new(1, 1, 2).unwrap();

        let (report, _) = run_rank(&mut LocalCollective, identity, &path, 3, 1).unwrap();

        assert_eq!(report.epochs_executed.len(), 3);
        assert!(report.snapshots_written.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_resume_starts_at_stored_epoch() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        let net  = NetConfig::new().init::<TestBackend>(&DEVICE);
        SnapshotStore::new(&path).save::<TestBackend, _>(&net, 2).unwrap();

        let (report, _) =
            run_rank(&mut LocalCollective, ProcessIdentity::single(), &path, 4, 1).unwrap();

        assert_eq!(report.epochs_executed, vec![2, 3]);
        assert_eq!(report.final_epochs_run, 4);
    }

    #[test]
    fn test_resume_after_completion_is_a_no_op() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");

        let (first, params_before) =
            run_rank(&mut LocalCollective, ProcessIdentity::single(), &path, 3, 1).unwrap();
        assert_eq!(first.final_epochs_run, 3);

        let (second, params_after) =
            run_rank(&mut LocalCollective, ProcessIdentity::single(), &path, 3, 1).unwrap();
        assert!(second.epochs_executed.is_empty());
        assert!(second.snapshots_written.is_empty());
        assert_eq!(second.final_epochs_run, 3);
        // resumed weights are the snapshot weights
        assert_eq!(params_before, params_after);
    }

    #[test]
    fn test_corrupt_snapshot_fails_construction() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let result = run_rank(&mut LocalCollective, ProcessIdentity::single(), &path, 1, 1);
        assert!(matches!(result, Err(TrainError::Deserialization { .. })));
    }

    #[test]
    fn test_malformed_batch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let identity = ProcessIdentity::single();
        let bad = vec![MnistItem { pixels: vec![0; 10], label: 1 }];

        let mut local = LocalCollective;
        let mut trainer = Trainer::new(
            NetConfig::new().init::<TestBackend>(&DEVICE),
            AdamConfig::new().init::<TestBackend, Net<TestBackend>>(),
            loader(identity, bad),
            AllReduceSync::new(&mut local),
            SnapshotStore::new(dir.path().join("snap.bin")),
            identity,
            &DEVICE,
            settings(1),
        )
        .unwrap();

        assert!(matches!(trainer.train(1), Err(TrainError::BatchShape { .. })));
        assert_eq!(trainer.epochs_run(), 0);
    }

    #[test]
    fn test_batches_stream_one_step_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = items(2);
        data.push(MnistItem { pixels: vec![0; 10], label: 3 });

        let mut local = LocalCollective;
        let mut trainer = Trainer::new(
            NetConfig::new().init::<TestBackend>(&DEVICE),
            AdamConfig::new().init::<TestBackend, Net<TestBackend>>(),
            PartitionedLoader::new(
                MnistDataset::new(data),
                Box::new(SequentialPartitioner),
                MnistBatcher::new(DEVICE),
                2,
            ),
            AllReduceSync::new(&mut local),
            SnapshotStore::new(dir.path().join("snap.bin")),
            ProcessIdentity::single(),
            &DEVICE,
            settings(1),
        )
        .unwrap();
        let before = flat_params(trainer.model());

        // the good first batch is applied before the bad second one is built
        assert!(matches!(trainer.train(1), Err(TrainError::BatchShape { .. })));
        assert_ne!(flat_params(trainer.model()), before);
        assert_eq!(trainer.epochs_run(), 0);
    }

    #[test]
    fn test_two_rank_gloo_end_to_end() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots").join("snap.bin");

        let handles: Vec<_> = ChannelCollective::group(2)
            .into_iter()
            .enumerate()
            .map(|(rank, collective)| {
                let path = path.clone();
                thread::spawn(move || {
                    let identity = ProcessIdentity::new(rank, rank, 2).unwrap();
                    let mut group = ProcessGroup::initialize_with(
                        Backend::Gloo,
                        identity,
                        &SystemProbe,
                        move |_| Ok(Box::new(collective) as Box<dyn Collective>),
                    )
                    .unwrap();
                    assert_eq!(group.binding(), DeviceBinding::Cpu);

                    let result = run_rank(group.collective_mut(), identity, &path, 2, 1).unwrap();
                    group.teardown().unwrap();
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let (rank0, params0) = &results[0];
        let (rank1, params1) = &results[1];

        assert_eq!(rank0.snapshots_written, vec![0, 1]);
        assert!(rank1.snapshots_written.is_empty());
        assert_eq!(rank0.epochs_executed, vec![0, 1]);
        assert_eq!(rank1.epochs_executed, vec![0, 1]);
        assert_eq!(stored_epochs(&path), 2);

        // averaged gradients keep the replicas identical
        assert_eq!(params0.len(), params1.len());
        for (a, b) in params0.iter().zip(params1) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_two_rank_tcp_rendezvous_end_to_end() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");

        // reserve a free port for rank 0 to listen on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
            .to_string();

        let handles: Vec<_> = (0..2)
            .map(|rank: usize| {
                let path = path.clone();
                let port = port.clone();
                thread::spawn(move || {
                    let rank_str = rank.to_string();
                    let env = LaunchEnv::from_pairs([
                        (RANK, rank_str.as_str()),
                        (LOCAL_RANK, rank_str.as_str()),
                        (WORLD_SIZE, "2"),
                        (MASTER_ADDR, "127.0.0.1"),
                        (MASTER_PORT, port.as_str()),
                    ]);
                    let mut group =
                        ProcessGroup::initialize(Backend::Gloo, &env, &SystemProbe).unwrap();
                    let identity = group.identity();
                    assert_eq!(identity.world_size(), 2);

                    let result = run_rank(group.collective_mut(), identity, &path, 2, 1).unwrap();
                    group.teardown().unwrap();
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let (rank0, params0) = &results[0];
        let (rank1, params1) = &results[1];

        assert_eq!(rank0.epochs_executed, vec![0, 1]);
        assert_eq!(rank1.epochs_executed, vec![0, 1]);
        assert_eq!(rank0.snapshots_written, vec![0, 1]);
        assert!(rank1.snapshots_written.is_empty());
        assert_eq!(stored_epochs(&path), 2);
        for (a, b) in params0.iter().zip(params1) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
