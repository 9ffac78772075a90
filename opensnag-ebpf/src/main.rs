#![no_std]
#![no_main]

// ============================================================================
// opensnag - eBPF Kernel-Space Tracer ("Hot Path")
// ============================================================================
//
// This program hooks into:
//   1. syscalls/sys_enter_openat (tracepoint) - records the call start
//   2. syscalls/sys_exit_openat  (tracepoint) - evaluates the outcome
//
// For each openat call:
//   - enter: stash {timestamp, filename pointer} keyed by the calling thread
//   - exit: correlate, compute latency, and only for anomalous calls
//     (negative return, or latency >= THRESHOLD_NS) materialize an OpenEvent
//     into the ring buffer
//
// The filename lives in the caller's address space and is only read on the
// anomaly path, after the ring slot is reserved: healthy calls never pay for
// it, and a full ring drops the event before paying for it either.
//
// VERIFIER CONSTRAINTS:
//   - 512-byte stack limit: OpenEvent (288 bytes) is written directly into
//     the reserved ring entry, never built on the stack
//   - No dynamic allocation, no unbounded loops
//   - Only core library used
// ============================================================================

use aya_ebpf::{
    helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_ktime_get_ns,
              bpf_probe_read_user_str_bytes},
    macros::{map, tracepoint},
    maps::{HashMap, RingBuf},
    programs::TracePointContext,
};
use opensnag_common::{should_report, OpenEvent, PendingOpen, EVENT_RING_BYTES, MAX_INFLIGHT_OPENS};

// ============================================================================
// eBPF Maps
// ============================================================================

/// In-flight opens awaiting their exit tracepoint.
/// Key: bpf_get_current_pid_tgid() (thread identity), Value: PendingOpen.
/// Once full, new calls go untracked until slots free up.
#[map]
static PENDING: HashMap<u64, PendingOpen> =
    HashMap::with_max_entries(MAX_INFLIGHT_OPENS, 0);

/// Anomaly Ring Buffer: events are pushed here for user-space consumption.
/// 16 MiB to absorb bursts; full buffer means dropped events, never blocking.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(EVENT_RING_BYTES, 0);

/// Latency threshold in nanoseconds, patched by the loader before the
/// programs are verified. Read through read_volatile so the compiler cannot
/// constant-fold the placeholder value.
#[no_mangle]
static THRESHOLD_NS: u64 = 0;

#[inline(always)]
fn threshold_ns() -> u64 {
    unsafe { core::ptr::read_volatile(&THRESHOLD_NS) }
}

// ============================================================================
// Tracepoint argument offsets
// ============================================================================

/// Offset of the filename pointer (args[1]) in the sys_enter_openat record:
/// 8-byte common header, 8-byte syscall nr, then dfd at 16.
const OPENAT_FNAME_OFFSET: usize = 24;

/// Offset of the return value in the sys_exit_openat record:
/// 8-byte common header, 8-byte syscall nr, then ret.
const SYS_EXIT_RET_OFFSET: usize = 16;

// ============================================================================
// Tracepoint: sys_enter_openat - Entry Recorder
// ============================================================================

/// Record the start of an openat call.
///
/// Stores only the timestamp and the raw filename pointer; nothing is read
/// from user memory and nothing is published here.
#[tracepoint]
pub fn opensnag_enter_open(ctx: TracePointContext) -> u32 {
    match try_enter_open(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0, // Never disturb the traced call
    }
}

#[inline(always)]
fn try_enter_open(ctx: &TracePointContext) -> Result<u32, i64> {
    let key = bpf_get_current_pid_tgid();

    let mut rec = PendingOpen::zeroed();
    rec.ts_ns = unsafe { bpf_ktime_get_ns() };
    rec.fname_ptr = unsafe { ctx.read_at::<u64>(OPENAT_FNAME_OFFSET)? };

    // BPF_ANY: a re-entered key overwrites its stale record (last write
    // wins). A full map silently leaves this call untracked.
    let _ = PENDING.insert(&key, &rec, 0);

    Ok(0)
}

// ============================================================================
// Tracepoint: sys_exit_openat - Exit Evaluator
// ============================================================================

/// Evaluate a completed openat call and publish it if anomalous.
#[tracepoint]
pub fn opensnag_exit_open(ctx: TracePointContext) -> u32 {
    match try_exit_open(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0,
    }
}

#[inline(always)]
fn try_exit_open(ctx: &TracePointContext) -> Result<u32, i64> {
    let key = bpf_get_current_pid_tgid();

    // Correlation miss: entry was dropped, or we attached mid-call.
    // Untracked is better than reported with garbage timing.
    let rec = match unsafe { PENDING.get(&key) } {
        Some(rec) => *rec,
        None => return Ok(0),
    };
    // Release the slot before deciding, so a racing re-entry for the same
    // thread can never lose its fresh record to this exit.
    let _ = PENDING.remove(&key);

    let ret: i64 = unsafe { ctx.read_at::<i64>(SYS_EXIT_RET_OFFSET)? };
    let duration_ns = unsafe { bpf_ktime_get_ns() } - rec.ts_ns;

    // Fast path: healthy call. No allocation, no user-memory read, no
    // channel write.
    if !should_report(ret, duration_ns, threshold_ns()) {
        return Ok(0);
    }

    // Reserve before touching user memory: a full ring drops the event
    // without paying for the filename read. Dropping beats blocking.
    if let Some(mut entry) = EVENTS.reserve::<OpenEvent>(0) {
        let ev = entry.as_mut_ptr();
        unsafe {
            // Zero the whole record first so no stray kernel bytes reach
            // user space through the comm/fname padding.
            core::ptr::write(ev, OpenEvent::zeroed());
            (*ev).pid = (key >> 32) as u32;
            (*ev).ret = ret as i32;
            (*ev).duration_ns = duration_ns;
            if let Ok(comm) = bpf_get_current_comm() {
                (*ev).comm = comm;
            }
            if rec.fname_ptr != 0 {
                // Best-effort: an unreadable filename publishes as empty.
                let _ = bpf_probe_read_user_str_bytes(
                    rec.fname_ptr as *const u8,
                    &mut (*ev).fname,
                );
            }
        }
        entry.submit(0);
    }

    Ok(0)
}

// ============================================================================
// Panic handler (required for #![no_std])
// ============================================================================

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
