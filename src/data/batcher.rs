// ============================================================
// Layer 4 — MNIST Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<MnistItem>
// into tensors on the bound device.
//
// How batching works here:
//   Input:  N MnistItems, each 784 bytes + 1 label byte
//   Output: MnistBatch
//             images  [N, 1, 28, 28]  float in [0, 1]
//             targets [N]             int class index
//
// Pixels are divided by 255 (the same scaling a ToTensor
// transform applies) and nothing else (no mean/std shift).
//
// Because the batcher owns the device, batches are born on
// the device the process is bound to. There is no separate
// "move to device" step in the training loop.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::{MnistItem, IMAGE_SIDE};

// ─── MnistBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct MnistBatch<B: Backend> {
    /// shape: [batch_size, 1, 28, 28]
    pub images: Tensor<B, 4>,

    /// shape: [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

// ─── MnistBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct MnistBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let batch_size = items.len();

        // ── Flatten pixels, scale to [0, 1] ───────────────────────────────────
        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().map(|&p| p as f32 / 255.0))
            .collect();

        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        // ── Create tensors ────────────────────────────────────────────────────
        // A malformed item is not padded or cropped: the pixels keep a
        // shape the model rejects with a BatchShape error.
        let image_len = IMAGE_SIDE * IMAGE_SIDE;
        let shape = if pixels.len() == batch_size * image_len {
            [batch_size, 1, IMAGE_SIDE, IMAGE_SIDE]
        } else if batch_size > 0 && pixels.len() % batch_size == 0 {
            [batch_size, 1, 1, pixels.len() / batch_size]
        } else {
            [1, 1, 1, pixels.len()]
        };
        let images = Tensor::<B, 4>::from_data(TensorData::new(pixels, shape), &self.device);

        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]),
            &self.device,
        );

        MnistBatch { images, targets }
    }
}
