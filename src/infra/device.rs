// ============================================================
// Layer 6 — Device Resolution
// ============================================================
// Decides which transport and which device this process uses.
//
// Two downgrades can happen, and neither is an error:
//
//   1. The accelerator transport was requested but there is no
//      accelerator → use the CPU transport (gloo) instead.
//   2. LOCAL_RANK points past the last device → bind device 0.
//
// Both are returned as FallbackWarning values so the caller
// decides how to report them (the coordinator logs them).
//
// Accelerators are Burn WGPU discrete GPUs, only compiled in
// with the `wgpu` cargo feature. Their count comes from the
// adapters wgpu actually enumerates, never from a guess.

use crate::domain::config::Backend;
use crate::domain::error::FallbackWarning;
use crate::domain::traits::DeviceProbe;

/// Where this process's tensors live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBinding {
    Cpu,
    Accelerator(usize),
}

impl DeviceBinding {
    /// Short tag used in log lines, e.g. "[CPU1]" / "[GPU0]"
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceBinding::Cpu            => "CPU",
            DeviceBinding::Accelerator(_) => "GPU",
        }
    }
}

impl std::fmt::Display for DeviceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceBinding::Cpu            => f.write_str("cpu"),
            DeviceBinding::Accelerator(i) => write!(f, "gpu:{i}"),
        }
    }
}

/// The outcome of device resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResolution {
    pub backend:  Backend,
    pub binding:  DeviceBinding,
    pub warnings: Vec<FallbackWarning>,
}

/// Resolve transport + device for a requested backend and local rank.
/// Never fails.
pub fn resolve_device(
    requested:  Backend,
    local_rank: usize,
    probe:      &dyn DeviceProbe,
) -> DeviceResolution {
    let mut warnings = Vec::new();

    if !requested.needs_accelerator() {
        return DeviceResolution { backend: Backend::Gloo, binding: DeviceBinding::Cpu, warnings };
    }

    let device_count = probe.accelerator_count();
    if device_count == 0 {
        warnings.push(FallbackWarning::NoAcceleratorAvailable);
        return DeviceResolution { backend: Backend::Gloo, binding: DeviceBinding::Cpu, warnings };
    }

    let index = if local_rank >= device_count {
        warnings.push(FallbackWarning::LocalRankOutOfRange { local_rank, device_count });
        0
    } else {
        local_rank
    };

    DeviceResolution {
        backend: Backend::Nccl,
        binding: DeviceBinding::Accelerator(index),
        warnings,
    }
}

// ─── SystemProbe ──────────────────────────────────────────────────────────────
/// Counts accelerators this process can actually bind.
///
/// Without the `wgpu` feature there is no accelerator backend compiled in,
/// so the count is always zero. With it, the discrete GPU adapters wgpu can
/// see are enumerated (the same set `WgpuDevice::DiscreteGpu(i)` indexes),
/// narrowed by CUDA_VISIBLE_DEVICES when the launcher set it. A host with no
/// adapter reports zero, so `nccl` falls back to `gloo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn accelerator_count(&self) -> usize {
        let adapters = discrete_adapter_count();
        let visible  = std::env::var("CUDA_VISIBLE_DEVICES").ok();
        usable_accelerators(adapters, visible.as_deref())
    }
}

#[cfg(feature = "wgpu")]
fn discrete_adapter_count() -> usize {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let count = instance
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .filter(|adapter| adapter.get_info().device_type == wgpu::DeviceType::DiscreteGpu)
        .count();
    tracing::debug!("wgpu reports {} discrete adapter(s)", count);
    count
}

#[cfg(not(feature = "wgpu"))]
fn discrete_adapter_count() -> usize {
    0
}

fn usable_accelerators(adapters: usize, visible: Option<&str>) -> usize {
    match visible {
        Some(list) => adapters.min(count_visible_devices(list)),
        None       => adapters,
    }
}

fn count_visible_devices(list: &str) -> usize {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "-1")
        .count()
}
