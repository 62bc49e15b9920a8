// ============================================================
// Layer 4 — MNIST IDX Reader
// ============================================================
// Reads the raw MNIST files from disk. Downloading them is
// somebody else's job; we only decode what is already there.
//
// IDX format (all integers big-endian):
//
//   images:  magic 0x00000803 | count | rows | cols | pixels…
//   labels:  magic 0x00000801 | count | labels…
//
// Each pixel and each label is one unsigned byte.
//
// File lookup, first match wins:
//
//   {dataset_path}/MNIST/raw/{prefix}-images-idx3-ubyte
//   {dataset_path}/{prefix}-images-idx3-ubyte
//
// where prefix is "train" or "t10k". The first layout is the
// one torchvision leaves behind after extracting the archive,
// so an existing data directory can be reused as-is.
//
// Reference: http://yann.lecun.com/exdb/mnist/ (file format)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::data::dataset::{MnistItem, IMAGE_SIDE};
use crate::domain::config::DatasetSplit;
use crate::domain::error::TrainError;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Locates and decodes one MNIST split.
pub struct MnistReader {
    root: PathBuf,
}

impl MnistReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Decode every sample of `split`.
    pub fn read_split(&self, split: DatasetSplit) -> Result<Vec<MnistItem>> {
        let prefix = split.file_prefix();
        let images_path = self.locate(&format!("{prefix}-images-idx3-ubyte"))?;
        let labels_path = self.locate(&format!("{prefix}-labels-idx1-ubyte"))?;

        tracing::info!("Reading MNIST '{}' split from '{}'", prefix, images_path.display());

        let images = fs::read(&images_path)
            .with_context(|| format!("Cannot read '{}'", images_path.display()))?;
        let labels = fs::read(&labels_path)
            .with_context(|| format!("Cannot read '{}'", labels_path.display()))?;

        Ok(decode(&images, &labels)?)
    }

    fn locate(&self, file_name: &str) -> Result<PathBuf> {
        let candidates = [
            self.root.join("MNIST").join("raw").join(file_name),
            self.root.join(file_name),
        ];
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                TrainError::Dataset(format!(
                    "'{}' not found under '{}' (looked in MNIST/raw/ and the directory itself)",
                    file_name,
                    self.root.display()
                ))
                .into()
            })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, TrainError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TrainError::Dataset("IDX header truncated".into()))
}

/// Decode an images/labels IDX pair into samples.
pub fn decode(images: &[u8], labels: &[u8]) -> Result<Vec<MnistItem>, TrainError> {
    // ── Headers ───────────────────────────────────────────────────────────────
    let magic = read_u32(images, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(TrainError::Dataset(format!("bad images magic {magic:#010x}")));
    }
    let magic = read_u32(labels, 0)?;
    if magic != LABELS_MAGIC {
        return Err(TrainError::Dataset(format!("bad labels magic {magic:#010x}")));
    }

    let count = read_u32(images, 4)? as usize;
    let rows  = read_u32(images, 8)? as usize;
    let cols  = read_u32(images, 12)? as usize;
    let label_count = read_u32(labels, 4)? as usize;

    if rows != IMAGE_SIDE || cols != IMAGE_SIDE {
        return Err(TrainError::Dataset(format!(
            "images are {rows}x{cols}, expected {IMAGE_SIDE}x{IMAGE_SIDE}"
        )));
    }
    if count != label_count {
        return Err(TrainError::Dataset(format!(
            "{count} images but {label_count} labels"
        )));
    }

    // ── Bodies ────────────────────────────────────────────────────────────────
    let pixels_per_image = rows * cols;
    let pixel_data = images
        .get(16..16 + count * pixels_per_image)
        .ok_or_else(|| TrainError::Dataset("images file truncated".into()))?;
    let label_data = labels
        .get(8..8 + count)
        .ok_or_else(|| TrainError::Dataset("labels file truncated".into()))?;

    let items = pixel_data
        .chunks_exact(pixels_per_image)
        .zip(label_data)
        .map(|(pixels, &label)| MnistItem { pixels: pixels.to_vec(), label })
        .collect();

    Ok(items)
}

/// Encode samples back into an IDX pair. Used to build fixtures.
#[cfg(test)]
pub fn encode(items: &[MnistItem]) -> (Vec<u8>, Vec<u8>) {
    let mut images = Vec::new();
    images.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
    images.extend_from_slice(&(items.len() as u32).to_be_bytes());
    images.extend_from_slice(&(IMAGE_SIDE as u32).to_be_bytes());
    images.extend_from_slice(&(IMAGE_SIDE as u32).to_be_bytes());
    let mut labels = Vec::new();
    labels.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
    labels.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        images.extend_from_slice(&item.pixels);
        labels.push(item.label);
    }
    (images, labels)
}

/// Write an IDX pair for `split` under `dir` in the torchvision layout.
#[cfg(test)]
pub fn write_fixture(dir: &std::path::Path, split: DatasetSplit, items: &[MnistItem]) {
    let raw = dir.join("MNIST").join("raw");
    fs::create_dir_all(&raw).unwrap();
    let (images, labels) = encode(items);
    let prefix = split.file_prefix();
    fs::write(raw.join(format!("{prefix}-images-idx3-ubyte")), images).unwrap();
    fs::write(raw.join(format!("{prefix}-labels-idx1-ubyte")), labels).unwrap();
}
