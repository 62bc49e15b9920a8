// ============================================================
// Layer 4 — Distributed Sampler
// ============================================================
// Splits dataset indices across ranks, one disjoint slice per
// process, reshuffled every epoch.
//
// Every rank must derive the SAME permutation for a given
// epoch, otherwise two ranks could train on the same samples
// while others are skipped. So instead of a thread RNG we
// seed a StdRng with (seed + epoch):
//
//   epoch 0 → permutation P0 on every rank
//   epoch 1 → permutation P1 ≠ P0, again identical everywhere
//
// The permutation is then padded by wrap-around until its
// length is a multiple of world_size, and rank r takes every
// world_size-th index starting at r:
//
//   permutation: [7 2 9 0 4 1 8 3 6 5]   world_size = 3
//   padded:      [7 2 9 0 4 1 8 3 6 5 7 2]
//   rank 0:      [7     0     8     5    ]
//   rank 1:      [  2     4     3     7  ]
//   rank 2:      [    9     1     6     2]
//
// Every rank ends up with the same number of samples, so all
// ranks run the same number of steps, and therefore issue
// the same number of gradient all-reduces.
//
// Reference: rand crate documentation (SeedableRng, SliceRandom)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Decides which dataset indices this rank visits in an epoch.
pub trait Partitioner: Send + Sync {
    /// Indices for `epoch`, in visiting order.
    fn partition(&self, epoch: usize, len: usize) -> Vec<usize>;

    /// Whether `partition` depends on the epoch argument.
    fn reshuffles_per_epoch(&self) -> bool {
        false
    }
}

/// Visits the whole dataset in order, ignoring ranks and epochs.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPartitioner;

#[cfg(test)]
impl Partitioner for SequentialPartitioner {
    fn partition(&self, _epoch: usize, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DistributedSampler {
    rank:       usize,
    world_size: usize,
    seed:       u64,
    shuffle:    bool,
}

impl DistributedSampler {
    pub fn new(rank: usize, world_size: usize) -> Self {
        assert!(world_size > 0 && rank < world_size, "rank {rank} outside world of {world_size}");
        Self { rank, world_size, seed: 0, shuffle: true }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Samples per rank per epoch: ceil(len / world_size).
    pub fn num_samples(&self, len: usize) -> usize {
        len.div_ceil(self.world_size)
    }
}

impl Partitioner for DistributedSampler {
    fn partition(&self, epoch: usize, len: usize) -> Vec<usize> {
        if len == 0 {
            return Vec::new();
        }

        let mut indices: Vec<usize> = (0..len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }

        // Pad by wrapping around so every rank gets the same count
        let total = self.num_samples(len) * self.world_size;
        let mut i = 0;
        while indices.len() < total {
            indices.push(indices[i % len]);
            i += 1;
        }

        indices
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }

    fn reshuffles_per_epoch(&self) -> bool {
        self.shuffle
    }
}
