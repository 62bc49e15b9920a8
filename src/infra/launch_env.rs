// ============================================================
// Layer 6 — Launch Environment
// ============================================================
// The external launcher (torchrun, a job scheduler, a shell
// loop) tells each process who it is through environment
// variables:
//
//   LOCAL_RANK   index within the node        (default 0)
//   RANK         index across all processes   (required)
//   WORLD_SIZE   number of processes          (default 1)
//   MASTER_ADDR  rendezvous host              (default 127.0.0.1)
//   MASTER_PORT  rendezvous port              (default 29500)
//
// We read them exactly once, in main, into a LaunchEnv value.
// From then on the rest of the program only sees the
// ProcessIdentity derived from it.

use std::collections::HashMap;

use crate::domain::error::{TrainError, TrainResult};
use crate::domain::identity::ProcessIdentity;

pub const LOCAL_RANK:  &str = "LOCAL_RANK";
pub const RANK:        &str = "RANK";
pub const WORLD_SIZE:  &str = "WORLD_SIZE";
pub const MASTER_ADDR: &str = "MASTER_ADDR";
pub const MASTER_PORT: &str = "MASTER_PORT";

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16  = 29500;

/// Snapshot of the launcher-provided variables.
#[derive(Debug, Clone, Default)]
pub struct LaunchEnv {
    vars: HashMap<String, String>,
}

impl LaunchEnv {
    /// Capture the relevant variables from the process environment.
    pub fn from_process_env() -> Self {
        Self::from_pairs(
            [LOCAL_RANK, RANK, WORLD_SIZE, MASTER_ADDR, MASTER_PORT]
                .into_iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (k, v))),
        )
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { vars }
    }

    /// Resolve this process's identity.
    /// A missing RANK is a misconfiguration and fails immediately.
    pub fn identity(&self) -> TrainResult<ProcessIdentity> {
        let global_rank = self
            .parse_usize(RANK)?
            .ok_or_else(|| TrainError::config(format!(
                "environment variable {RANK} is not set; launch with torchrun or export {RANK}"
            )))?;
        let local_rank = self.parse_usize(LOCAL_RANK)?.unwrap_or(0);
        let world_size = self.parse_usize(WORLD_SIZE)?.unwrap_or(1);
        ProcessIdentity::new(local_rank, global_rank, world_size)
    }

    /// host:port where rank 0 listens for its peers.
    pub fn rendezvous_address(&self) -> TrainResult<String> {
        let host = self
            .vars
            .get(MASTER_ADDR)
            .map(String::as_str)
            .unwrap_or(DEFAULT_MASTER_ADDR);
        let port = match self.vars.get(MASTER_PORT) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                TrainError::config(format!("{MASTER_PORT}='{raw}' is not a valid port: {e}"))
            })?,
            None => DEFAULT_MASTER_PORT,
        };
        Ok(format!("{host}:{port}"))
    }

    fn parse_usize(&self, key: &str) -> TrainResult<Option<usize>> {
        match self.vars.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|e| TrainError::config(format!("{key}='{raw}' is not a valid rank: {e}"))),
        }
    }
}
