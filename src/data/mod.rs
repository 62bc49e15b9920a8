// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the IDX files on disk and tensor
// batches on this rank's device.
//
//   IDX files (images + labels)
//       │
//       ▼
//   MnistReader        → decodes the raw files
//       │
//       ▼
//   MnistDataset       → implements Burn's Dataset trait
//       │
//       ▼
//   DistributedSampler → this rank's indices for this epoch
//       │
//       ▼
//   MnistBatcher       → stacks samples into tensor batches
//       │
//       ▼
//   PartitionedLoader  → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Decodes MNIST IDX files
pub mod mnist;

/// Implements Burn's Dataset trait for MNIST samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Epoch-seeded partitioning of indices across ranks
pub mod sampler;

/// Sequential per-rank batch iterator
pub mod loader;
