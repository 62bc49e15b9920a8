// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits describing a distributed
// training run. Nothing in here touches Burn, the filesystem
// or the network.
//
// What lives here:
//
//   config.rs   — TrainingConfig + Backend / DatasetSplit enums
//                 Validated once, immutable afterwards.
//
//   identity.rs — ProcessIdentity (local rank, global rank,
//                 world size). Passed explicitly to every
//                 component that needs to know "who am I".
//
//   error.rs    — The error taxonomy shared by all layers:
//                 configuration, deserialization, batch shape,
//                 transport, dataset.
//
//   traits.rs   — Seams other layers implement:
//                 Collective (gradient averaging transport)
//                 DeviceProbe (how many accelerators exist)
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Training hyperparameters and paths
pub mod config;

/// Rank / world-size identity of this process
pub mod identity;

/// Error taxonomy
pub mod error;

/// Core abstractions (traits) that other layers implement
pub mod traits;
