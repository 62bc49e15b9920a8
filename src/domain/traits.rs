// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The trainer never talks to a socket or a GPU driver
// directly. It talks to these traits, and Layer 6 provides
// the implementations:
//
//   Collective
//     - LocalCollective   → world of one, every op is a no-op
//     - TcpCollective     → one process per rank, star topology
//     - ChannelCollective → ranks as threads (tests only)
//
//   DeviceProbe
//     - SystemProbe       → what this machine actually has
//     - (tests)           → any fixed count
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::error::TrainResult;

// ─── Collective ───────────────────────────────────────────────────────────────
/// A synchronous collective-communication context.
///
/// Every rank must call the same operations in the same order with
/// buffers of the same length, otherwise the job deadlocks. Each call
/// blocks until all peers have arrived.
pub trait Collective: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Replace `buffer` on every rank with the element-wise mean of
    /// all ranks' buffers.
    fn all_reduce_mean(&mut self, buffer: &mut [f32]) -> TrainResult<()>;

    /// Overwrite `buffer` on every rank with rank 0's contents.
    fn broadcast_from_root(&mut self, buffer: &mut [f32]) -> TrainResult<()>;

    /// Release transport resources. Called once by the process group.
    fn shutdown(&mut self) -> TrainResult<()> {
        Ok(())
    }
}

// ─── DeviceProbe ──────────────────────────────────────────────────────────────
/// Reports how many accelerator devices this process can bind to.
pub trait DeviceProbe {
    fn accelerator_count(&self) -> usize;
}
