// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// The parts of a run that talk to the outside world:
//
//   launch_env.rs    — reads LOCAL_RANK / RANK / WORLD_SIZE /
//                      MASTER_ADDR / MASTER_PORT as set by the
//                      multi-process launcher.
//
//   device.rs        — decides CPU vs accelerator for this rank,
//                      falling back to CPU with a warning.
//
//   collective.rs    — transports that average a flat f32
//                      buffer across ranks (in-process, channel,
//                      TCP star).
//
//   process_group.rs — ties the three above together and owns
//                      the communication context until teardown.
//
//   snapshot.rs      — the single resumable snapshot file
//                      (model record + completed epoch count).
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §16 (Fearless Concurrency)

/// Launcher environment variables
pub mod launch_env;

/// Device selection and fallback
pub mod device;

/// Collective-communication transports
pub mod collective;

/// Process-group lifecycle
pub mod process_group;

/// Snapshot persistence
pub mod snapshot;
