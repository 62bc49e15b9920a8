// ============================================================
// Layer 4 — Partitioned Loader
// ============================================================
// Feeds this rank's share of the dataset to the trainer, one
// batch at a time:
//
//   Partitioner   → which indices, in which order (per epoch)
//   MnistDataset  → index → MnistItem
//   MnistBatcher  → Vec<MnistItem> → MnistBatch on the device
//
// Batches are produced lazily and strictly in sequence. There
// are no worker threads: the collective calls issued per
// batch must happen in the same order on every rank, and a
// single producer keeps that trivially true.
//
// The last batch of an epoch may be smaller than batch_size.

use burn::data::{dataloader::batcher::Batcher, dataset::Dataset};
use burn::prelude::Backend;

use crate::data::{
    batcher::{MnistBatch, MnistBatcher},
    dataset::MnistDataset,
    sampler::Partitioner,
};

pub struct PartitionedLoader<B: Backend> {
    dataset:     MnistDataset,
    partitioner: Box<dyn Partitioner>,
    batcher:     MnistBatcher<B>,
    batch_size:  usize,
    epoch:       usize,
}

impl<B: Backend> PartitionedLoader<B> {
    pub fn new(
        dataset:     MnistDataset,
        partitioner: Box<dyn Partitioner>,
        batcher:     MnistBatcher<B>,
        batch_size:  usize,
    ) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self { dataset, partitioner, batcher, batch_size, epoch: 0 }
    }

    /// Whether set_epoch() changes the partition.
    pub fn reshuffles_per_epoch(&self) -> bool {
        self.partitioner.reshuffles_per_epoch()
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Indices this rank visits in the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        self.partitioner.partition(self.epoch, self.dataset.len())
    }

    /// Steps this rank runs per epoch.
    pub fn num_batches(&self) -> usize {
        self.indices().len().div_ceil(self.batch_size)
    }

    /// Iterate over this rank's batches for the current epoch.
    pub fn iter(&self) -> impl Iterator<Item = MnistBatch<B>> + '_ {
        let indices = self.indices();
        let chunks: Vec<Vec<usize>> = indices
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        chunks.into_iter().map(move |chunk| {
            let items = chunk
                .into_iter()
                .filter_map(|i| self.dataset.get(i))
                .collect();
            self.batcher.batch(items)
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{MnistItem, IMAGE_SIDE};
    use crate::data::sampler::{DistributedSampler, SequentialPartitioner};
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    type TestBackend = NdArray<f32>;

    fn dataset(n: usize) -> MnistDataset {
        MnistDataset::new(
            (0..n)
                .map(|i| MnistItem { pixels: vec![0; IMAGE_SIDE * IMAGE_SIDE], label: (i % 10) as u8 })
                .collect(),
        )
    }

    fn loader(n: usize, p: Box<dyn Partitioner>, batch: usize) -> PartitionedLoader<TestBackend> {
        PartitionedLoader::new(dataset(n), p, MnistBatcher::new(NdArrayDevice::Cpu), batch)
    }

    #[test]
    fn test_batches_cover_partition_with_short_tail() {
        let l = loader(10, Box::new(SequentialPartitioner), 4);
        let sizes: Vec<usize> = l.iter().map(|b| b.images.dims()[0]).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(l.num_batches(), 3);
    }

    #[test]
    fn test_epoch_changes_order_for_distributed_sampler() {
        let mut l = loader(50, Box::new(DistributedSampler::new(0, 2)), 8);
        assert!(l.reshuffles_per_epoch());
        l.set_epoch(0);
        let first = l.indices();
        l.set_epoch(1);
        assert_ne!(first, l.indices());
        l.set_epoch(0);
        assert_eq!(first, l.indices());
    }

    #[test]
    fn test_each_rank_gets_half() {
        let l = loader(10, Box::new(DistributedSampler::new(1, 2)), 64);
        assert_eq!(l.num_batches(), 1);
        assert_eq!(l.iter().next().unwrap().targets.dims(), [5]);
    }
}
