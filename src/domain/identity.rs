// ============================================================
// Layer 3 — Process Identity
// ============================================================
// Who this process is inside the training job.
//
//   local_rank  — index within the node (picks the device)
//   global_rank — index across every process (picks the
//                 data partition, decides who writes snapshots)
//   world_size  — how many processes take part
//
// Assigned once at startup from the launcher's environment and
// then handed to constructors by value. Nothing reads rank
// variables from the process environment after that point.

use serde::{Deserialize, Serialize};

use crate::domain::error::{TrainError, TrainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    local_rank:  usize,
    global_rank: usize,
    world_size:  usize,
}

impl ProcessIdentity {
    pub fn new(local_rank: usize, global_rank: usize, world_size: usize) -> TrainResult<Self> {
        if world_size == 0 {
            return Err(TrainError::config("world size must be greater than 0"));
        }
        if global_rank >= world_size {
            return Err(TrainError::config(format!(
                "global rank {global_rank} is out of range for world size {world_size}"
            )));
        }
        Ok(Self { local_rank, global_rank, world_size })
    }

    /// A lone process: rank 0 of a world of one.
    pub fn single() -> Self {
        Self { local_rank: 0, global_rank: 0, world_size: 1 }
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn global_rank(&self) -> usize {
        self.global_rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Global rank 0 is the only process allowed to write snapshots.
    pub fn is_snapshot_writer(&self) -> bool {
        self.global_rank == 0
    }
}
