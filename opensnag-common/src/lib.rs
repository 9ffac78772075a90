#![cfg_attr(not(test), no_std)]

// ============================================================================
// opensnag - Shared Wire Types
// ============================================================================
//
// This crate defines the records passed between the kernel-space eBPF
// programs and the user-space consumer via an eBPF Ring Buffer, plus the
// anomaly decision predicate both sides agree on.
//
// CRITICAL CONSTRAINTS:
// - #![no_std]: No standard library usage allowed (eBPF kernel compatibility)
// - #[repr(C)]: All structs use C memory layout for deterministic alignment
//   across the eBPF VM and host architecture
// - Fixed-size only: No String, Vec, or any heap-allocated types
// - All text fields use fixed-size, NUL-padded byte arrays
// ============================================================================

/// Maximum length for process command name (matches Linux TASK_COMM_LEN)
pub const TASK_COMM_LEN: usize = 16;

/// Maximum length for the opened file name
pub const MAX_FNAME_LEN: usize = 256;

/// Capacity of the correlation map: openat calls that may be in flight
/// across all threads at once. Beyond this, entries are silently untracked.
pub const MAX_INFLIGHT_OPENS: u32 = 10_240;

/// Byte size of the anomaly ring buffer (16 MiB, power of two).
pub const EVENT_RING_BYTES: u32 = 16 * 1024 * 1024;

/// Threshold value for errors-only mode: no real call can last this long,
/// so only failed opens satisfy the decision predicate.
pub const THRESHOLD_ERRORS_ONLY: u64 = u64::MAX;

// ============================================================================
// Correlation record (sys_enter_openat -> sys_exit_openat)
// ============================================================================

/// Start-of-call record stored in the correlation map at sys_enter_openat
/// and consumed at sys_exit_openat.
///
/// Holds the raw user-space pointer to the filename argument rather than the
/// string itself: the cross-context read is paid only if the call turns out
/// anomalous.
///
/// Memory layout (with #[repr(C)]):
///   offset  0: ts_ns      (8 bytes)
///   offset  8: fname_ptr  (8 bytes)
///   Total: 16 bytes
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PendingOpen {
    /// Monotonic timestamp at syscall entry (bpf_ktime_get_ns)
    pub ts_ns: u64,
    /// User-space address of the filename argument, not yet dereferenced
    pub fname_ptr: u64,
}

// ============================================================================
// Anomaly record (ring buffer payload)
// ============================================================================

/// One anomalous openat call: it failed, or it met the latency threshold.
///
/// Pushed to the ring buffer by the exit-side eBPF program, decoded by the
/// user-space consumer. Healthy calls never materialize one of these.
///
/// Memory layout (with #[repr(C)]):
///   offset  0: pid          (4 bytes)
///   offset  4: ret          (4 bytes)
///   offset  8: duration_ns  (8 bytes)
///   offset 16: comm         (16 bytes)
///   offset 32: fname        (256 bytes)
///   Total: 288 bytes
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OpenEvent {
    /// Process ID (tgid) of the caller
    pub pid: u32,
    /// openat return value: new fd, or negative errno
    pub ret: i32,
    /// Enter-to-exit latency in nanoseconds
    pub duration_ns: u64,
    /// Command name (task comm), NUL-padded fixed-size array
    pub comm: [u8; TASK_COMM_LEN],
    /// Opened file name, NUL-padded; empty if the user-space read failed
    pub fname: [u8; MAX_FNAME_LEN],
}

// ============================================================================
// Anomaly decision
// ============================================================================

/// The single branch separating silent calls from reported ones.
///
/// A call is anomalous when it failed outright, or when it took at least
/// `threshold_ns` to complete (inclusive boundary). A threshold of 0 reports
/// every call; [`THRESHOLD_ERRORS_ONLY`] reports failures only.
#[inline(always)]
pub fn should_report(ret: i64, duration_ns: u64, threshold_ns: u64) -> bool {
    ret < 0 || duration_ns >= threshold_ns
}

// ============================================================================
// Safe construction helpers
// ============================================================================

impl PendingOpen {
    /// Create a zeroed PendingOpen
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            ts_ns: 0,
            fname_ptr: 0,
        }
    }
}

impl OpenEvent {
    /// Create a zeroed OpenEvent (safe for direct ring-buffer writes; no
    /// kernel memory can leak through untouched bytes)
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            pid: 0,
            ret: 0,
            duration_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
            fname: [0u8; MAX_FNAME_LEN],
        }
    }
}

// Safety: These types are plain-old-data with fixed layout, safe to share
// across threads and send between kernel/user space.
unsafe impl Sync for OpenEvent {}
unsafe impl Send for OpenEvent {}
unsafe impl Sync for PendingOpen {}
unsafe impl Send for PendingOpen {}
