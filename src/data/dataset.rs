use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// MNIST images are 28×28 single-channel.
pub const IMAGE_SIDE: usize = 28;

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

/// One raw sample: row-major grayscale pixels and its digit label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnistItem {
    pub pixels: Vec<u8>,
    pub label:  u8,
}

pub struct MnistDataset {
    items: Vec<MnistItem>,
}

impl MnistDataset {
    pub fn new(items: Vec<MnistItem>) -> Self { Self { items } }
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
