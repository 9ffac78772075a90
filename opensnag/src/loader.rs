//! eBPF object loading and tracepoint attachment.

use std::path::Path;

use anyhow::{Context, Result};
use aya::maps::{MapData, RingBuf};
use aya::programs::TracePoint;
use aya::{Ebpf, EbpfLoader};
use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};
use tracing::{info, warn};

/// Raise RLIMIT_MEMLOCK so older kernels can lock map memory. Kernels from
/// 5.11 on account BPF memory to the memory cgroup instead, so failure here
/// is not fatal on its own.
pub fn raise_memlock_limit() {
    if let Err(e) = setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY) {
        warn!(error = %e, "failed to raise RLIMIT_MEMLOCK; eBPF load may fail on older kernels");
    }
}

/// Load the eBPF object with the latency threshold patched into its
/// read-only data, then load and attach both openat tracepoints.
///
/// The returned handle must stay alive for the lifetime of the trace:
/// dropping it detaches the programs.
pub fn load_and_attach(obj_path: &Path, threshold_ns: u64) -> Result<Ebpf> {
    info!(path = %obj_path.display(), threshold_ns, "loading eBPF object");
    let mut ebpf = EbpfLoader::new()
        .set_global("THRESHOLD_NS", &threshold_ns, true)
        .load_file(obj_path)
        .context("Failed to load eBPF object file")?;

    attach_tracepoint(&mut ebpf, "opensnag_enter_open", "sys_enter_openat")?;
    attach_tracepoint(&mut ebpf, "opensnag_exit_open", "sys_exit_openat")?;

    Ok(ebpf)
}

fn attach_tracepoint(ebpf: &mut Ebpf, program: &str, tracepoint: &str) -> Result<()> {
    let prog: &mut TracePoint = ebpf
        .program_mut(program)
        .with_context(|| format!("eBPF program '{program}' not found"))?
        .try_into()
        .context("Program is not a TracePoint")?;
    prog.load()
        .with_context(|| format!("Failed to load '{program}'"))?;
    prog.attach("syscalls", tracepoint)
        .with_context(|| format!("Failed to attach syscalls/{tracepoint}"))?;
    info!("Attached tracepoint: syscalls/{tracepoint}");
    Ok(())
}

/// Take ownership of the EVENTS ring buffer out of the loaded object.
pub fn take_event_ring(ebpf: &mut Ebpf) -> Result<RingBuf<MapData>> {
    let map = ebpf
        .take_map("EVENTS")
        .context("EVENTS ring buffer map not found in eBPF object")?;
    RingBuf::try_from(map).context("Failed to open EVENTS as RingBuf")
}
