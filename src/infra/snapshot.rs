// ============================================================
// Layer 6 — Snapshot Store
// ============================================================
// Persists and restores training progress at a single path.
//
// A snapshot holds exactly two things:
//   1. model_state — every learned parameter, recorded with
//                    Burn's BinBytesRecorder at full precision
//   2. epochs_run  — how many epochs have fully completed;
//                    training resumes at this epoch index
//
// Optimizer moments and RNG state are NOT stored. A resumed
// run restarts Adam from scratch at the saved epoch.
//
// On-disk layout (bincode, fixed-width integers):
//
//   SnapshotFile {
//       model_state: Vec<u8>,   // burn record bytes
//       epochs_run:  u64,
//   }
//
// Writes are atomic: the bytes go to a temporary file in the
// destination directory, which is then renamed over the old
// snapshot. A crash mid-write leaves the previous snapshot
// intact. Only global rank 0 ever calls save().
//
// Reference: Burn Book §5 (Records and Checkpointing)

use bincode::Options;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::error::{TrainError, TrainResult};

type SnapshotRecorder = BinBytesRecorder<FullPrecisionSettings>;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    model_state: Vec<u8>,
    epochs_run:  u64,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Reads and writes the snapshot file at one fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Directory the snapshot lives in ("." for a bare file name).
    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Create the snapshot's parent directory if it is missing.
    pub fn ensure_parent_dir(&self) -> TrainResult<()> {
        fs::create_dir_all(self.parent_dir())?;
        Ok(())
    }

    /// Record `model` and write it together with `epochs_run`,
    /// replacing any previous snapshot.
    pub fn save<B, M>(&self, model: &M, epochs_run: usize) -> TrainResult<()>
    where
        B: Backend,
        M: Module<B>,
    {
        let recorder = SnapshotRecorder::default();
        let model_state = <SnapshotRecorder as Recorder<B>>::record(
            &recorder,
            model.clone().into_record(),
            (),
        )
        .map_err(|e| TrainError::Io(std::io::Error::other(e.to_string())))?;

        let file = SnapshotFile { model_state, epochs_run: epochs_run as u64 };
        let bytes = codec()
            .serialize(&file)
            .map_err(|e| TrainError::Io(std::io::Error::other(e.to_string())))?;

        self.ensure_parent_dir()?;
        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir())?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| TrainError::Io(e.error))?;

        tracing::debug!(
            "Wrote snapshot '{}' ({} bytes, epochs_run={})",
            self.path.display(),
            bytes.len(),
            epochs_run
        );
        Ok(())
    }

    /// Load the snapshot into `model`, placing tensors on `device`.
    ///
    /// Returns the restored model and the stored epoch count. Fails with
    /// TrainError::Deserialization if the file is truncated, corrupt, or
    /// was written for a different architecture.
    pub fn load<B, M>(&self, model: M, device: &B::Device) -> TrainResult<(M, usize)>
    where
        B: Backend,
        M: Module<B>,
    {
        let bytes = fs::read(&self.path)?;

        let file: SnapshotFile = codec()
            .with_limit(bytes.len() as u64)
            .deserialize(&bytes)
            .map_err(|e| TrainError::deserialization(&self.path, e))?;

        let record = <SnapshotRecorder as Recorder<B>>::load::<M::Record>(
            &SnapshotRecorder::default(),
            file.model_state,
            device,
        )
        .map_err(|e| TrainError::deserialization(&self.path, e))?;

        let expected_params = model.num_params();
        let model = model.load_record(record);
        if model.num_params() != expected_params {
            return Err(TrainError::deserialization(
                &self.path,
                format!(
                    "parameter count {} does not match model ({})",
                    model.num_params(),
                    expected_params
                ),
            ));
        }

        let epochs_run = usize::try_from(file.epochs_run)
            .map_err(|e| TrainError::deserialization(&self.path, e))?;
        Ok((model, epochs_run))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArrayDevice, NdArray},
        nn::{Linear, LinearConfig},
        tensor::Tensor,
    };

    type TestBackend = NdArray<f32>;

    #[derive(Module, Debug)]
    struct Tiny<B: Backend> {
        fc: Linear<B>,
    }

    fn tiny(inputs: usize) -> Tiny<TestBackend> {
        Tiny { fc: LinearConfig::new(inputs, 2).init(&NdArrayDevice::Cpu) }
    }

    fn weights(m: &Tiny<TestBackend>) -> Vec<f32> {
        m.fc.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_save_then_load_restores_weights_and_epoch() {
        let dir   = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.bin"));
        assert!(!store.exists());

        let original = tiny(3);
        store.save::<TestBackend, _>(&original, 4).unwrap();
        assert!(store.exists());

        let (restored, epochs_run) =
            store.load::<TestBackend, _>(tiny(3), &NdArrayDevice::Cpu).unwrap();
        assert_eq!(epochs_run, 4);
        assert_eq!(weights(&restored), weights(&original));
    }

    #[test]
    fn test_save_creates_missing_parent_directory() {
        let dir   = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested/deeper/snap.bin"));
        store.save::<TestBackend, _>(&tiny(2), 0).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let dir   = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.bin"));
        store.save::<TestBackend, _>(&tiny(2), 1).unwrap();
        store.save::<TestBackend, _>(&tiny(2), 2).unwrap();

        let (_, epochs_run) = store.load::<TestBackend, _>(tiny(2), &NdArrayDevice::Cpu).unwrap();
        assert_eq!(epochs_run, 2);
        // only the snapshot itself remains, no leftover temp files
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_deserialization_error() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        fs::write(&path, b"definitely not a snapshot").unwrap();

        let store  = SnapshotStore::new(&path);
        let result = store.load::<TestBackend, _>(tiny(2), &NdArrayDevice::Cpu);
        assert!(matches!(result, Err(TrainError::Deserialization { .. })));
    }

    #[test]
    fn test_truncated_file_is_deserialization_error() {
        let dir   = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.bin"));
        store.save::<TestBackend, _>(&tiny(2), 3).unwrap();

        let bytes = fs::read(store.path()).unwrap();
        fs::write(store.path(), &bytes[..bytes.len() - 4]).unwrap();

        let result = store.load::<TestBackend, _>(tiny(2), &NdArrayDevice::Cpu);
        assert!(matches!(result, Err(TrainError::Deserialization { .. })));
    }

    #[test]
    fn test_loaded_tensors_usable_on_device() {
        let dir   = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.bin"));
        store.save::<TestBackend, _>(&tiny(3), 0).unwrap();

        let (m, _) = store.load::<TestBackend, _>(tiny(3), &NdArrayDevice::Cpu).unwrap();
        let x = Tensor::<TestBackend, 2>::ones([1, 3], &NdArrayDevice::Cpu);
        assert_eq!(m.fc.forward(x).dims(), [1, 2]);
    }
}
