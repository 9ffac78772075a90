//! End-to-end tests of the anomaly pipeline at the user-space level: the
//! decision predicate shared with the kernel programs, the wire encoding,
//! decode, and rendering, exercised together the way live records flow.

use opensnag::event::AnomalyRecord;
use opensnag::render;
use opensnag_common::{should_report, OpenEvent, THRESHOLD_ERRORS_ONLY};

const THRESHOLD_10MS: u64 = 10_000_000;

fn make_event(pid: u32, ret: i32, duration_ns: u64, comm: &str, fname: &str) -> OpenEvent {
    let mut ev = OpenEvent::zeroed();
    ev.pid = pid;
    ev.ret = ret;
    ev.duration_ns = duration_ns;
    ev.comm[..comm.len()].copy_from_slice(comm.as_bytes());
    ev.fname[..fname.len()].copy_from_slice(fname.as_bytes());
    ev
}

fn raw_bytes(ev: &OpenEvent) -> Vec<u8> {
    let ptr = ev as *const OpenEvent as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<OpenEvent>()) }.to_vec()
}

/// Mirror of the kernel-side exit path: apply the decision policy, and only
/// on a positive decision materialize the wire record.
fn publish(
    ret: i64,
    duration_ns: u64,
    threshold_ns: u64,
    comm: &str,
    fname: &str,
) -> Option<Vec<u8>> {
    if !should_report(ret, duration_ns, threshold_ns) {
        return None;
    }
    let ev = make_event(4242, ret as i32, duration_ns, comm, fname);
    Some(raw_bytes(&ev))
}

#[test]
fn fast_success_stays_silent() {
    assert!(publish(3, 5_000_000, THRESHOLD_10MS, "cat", "/etc/hosts").is_none());
}

#[test]
fn slow_success_is_reported_with_its_result() {
    let bytes = publish(0, 15_000_000, THRESHOLD_10MS, "postgres", "/var/lib/db/wal")
        .expect("slow success must be reported");
    let rec = AnomalyRecord::decode(&bytes).unwrap();

    assert_eq!(rec.ret, 0);
    assert_eq!(rec.duration_ns, 15_000_000);
    assert_eq!(rec.comm, "postgres");
    assert_eq!(rec.fname, "/var/lib/db/wal");
    assert_eq!(rec.result_label(), "OK");
}

#[test]
fn fast_failure_is_reported_and_named() {
    let bytes = publish(-2, 1_000_000, THRESHOLD_10MS, "cat", "/etc/missing.conf")
        .expect("failure must be reported regardless of latency");
    let rec = AnomalyRecord::decode(&bytes).unwrap();

    assert_eq!(rec.ret, -2);
    let row = render::text_row(&rec);
    assert!(row.contains("no such entry"));
    assert!(row.contains("/etc/missing.conf"));
}

#[test]
fn duration_equal_to_threshold_is_reported() {
    assert!(publish(0, THRESHOLD_10MS, THRESHOLD_10MS, "sh", "/tmp/x").is_some());
    assert!(publish(0, THRESHOLD_10MS - 1, THRESHOLD_10MS, "sh", "/tmp/x").is_none());
}

#[test]
fn zero_threshold_reports_every_call() {
    assert!(publish(3, 0, 0, "sh", "/tmp/x").is_some());
}

#[test]
fn errors_only_mode_ignores_slow_successes() {
    assert!(publish(0, 3_600_000_000_000, THRESHOLD_ERRORS_ONLY, "sh", "/tmp/x").is_none());

    let bytes = publish(-13, 50, THRESHOLD_ERRORS_ONLY, "nginx", "/etc/shadow")
        .expect("failures still fire in errors-only mode");
    let rec = AnomalyRecord::decode(&bytes).unwrap();
    assert_eq!(rec.result_label(), "EACCES (permission denied)");
}

#[test]
fn wire_record_round_trips_through_json() {
    let bytes = publish(-24, 2_000_000, THRESHOLD_10MS, "leaky", "/var/log/app.log").unwrap();
    let rec = AnomalyRecord::decode(&bytes).unwrap();
    let line = render::json_row(&rec).unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();

    assert_eq!(value["pid"], 4242);
    assert_eq!(value["comm"], "leaky");
    assert_eq!(value["lat_ns"], 2_000_000);
    assert_eq!(value["result"], "EMFILE (too many open handles)");
    assert_eq!(value["file"], "/var/log/app.log");
    assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn truncated_record_does_not_decode() {
    let bytes = publish(-2, 1_000, THRESHOLD_10MS, "sh", "/tmp/x").unwrap();
    assert!(AnomalyRecord::decode(&bytes[..64]).is_err());
}
