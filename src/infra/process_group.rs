// ============================================================
// Layer 6 — Process Group Coordinator
// ============================================================
// Establishes the communication context shared by every rank:
//
//   1. Resolve identity  (LaunchEnv → ProcessIdentity)
//   2. Resolve device    (requested backend + LOCAL_RANK +
//                         DeviceProbe → transport, binding)
//   3. Open collective   (world of one → LocalCollective,
//                         otherwise TCP rendezvous)
//
// The returned ProcessGroup is a scoped resource: teardown()
// releases the transport exactly once. If the caller bails out
// early with `?`, Drop performs the teardown instead, so the
// sockets are released on every exit path.

use std::time::Duration;

use crate::domain::config::Backend;
use crate::domain::error::TrainResult;
use crate::domain::identity::ProcessIdentity;
use crate::domain::traits::{Collective, DeviceProbe};
use crate::infra::collective::{LocalCollective, TcpCollective};
use crate::infra::device::{resolve_device, DeviceBinding};
use crate::infra::launch_env::LaunchEnv;

/// How long ranks wait for each other during rendezvous.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ProcessGroup {
    identity:   ProcessIdentity,
    backend:    Backend,
    binding:    DeviceBinding,
    collective: Box<dyn Collective>,
    torn_down:  bool,
}

impl ProcessGroup {
    /// Initialize from the launcher environment, dialing peers over TCP.
    pub fn initialize(
        requested: Backend,
        env:       &LaunchEnv,
        probe:     &dyn DeviceProbe,
    ) -> TrainResult<Self> {
        let identity = env.identity()?;
        Self::initialize_with(requested, identity, probe, |id| {
            if id.world_size() == 1 {
                return Ok(Box::new(LocalCollective) as Box<dyn Collective>);
            }
            let address = env.rendezvous_address()?;
            tracing::info!(
                "Rank {} joining rendezvous at {} (world size {})",
                id.global_rank(), address, id.world_size()
            );
            let tcp = TcpCollective::rendezvous(id, &address, RENDEZVOUS_TIMEOUT)?;
            Ok(Box::new(tcp) as Box<dyn Collective>)
        })
    }

    /// Initialize with an explicit identity and a caller-supplied transport.
    ///
    /// Device resolution happens before the transport is opened so a
    /// misconfigured device never leaves half-connected sockets behind.
    pub fn initialize_with<F>(
        requested: Backend,
        identity:  ProcessIdentity,
        probe:     &dyn DeviceProbe,
        open:      F,
    ) -> TrainResult<Self>
    where
        F: FnOnce(&ProcessIdentity) -> TrainResult<Box<dyn Collective>>,
    {
        let resolution = resolve_device(requested, identity.local_rank(), probe);
        for warning in &resolution.warnings {
            tracing::warn!("{}", warning);
        }

        let collective = open(&identity)?;
        tracing::info!(
            "Process group ready: rank {}/{} (local {}), backend={}, device={}",
            identity.global_rank(),
            identity.world_size(),
            identity.local_rank(),
            resolution.backend,
            resolution.binding,
        );

        Ok(Self {
            identity,
            backend: resolution.backend,
            binding: resolution.binding,
            collective,
            torn_down: false,
        })
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    /// The transport actually in use (after any fallback).
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn binding(&self) -> DeviceBinding {
        self.binding
    }

    pub fn collective_mut(&mut self) -> &mut dyn Collective {
        self.collective.as_mut()
    }

    /// Release the communication context. Idempotent.
    pub fn teardown(&mut self) -> TrainResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        tracing::info!("Tearing down process group (rank {})", self.identity.global_rank());
        self.collective.shutdown()
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("Process group teardown failed: {}", e);
        }
    }
}
