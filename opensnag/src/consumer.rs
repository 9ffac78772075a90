//! Ring-buffer consumer: decode, filter, render.
//!
//! The sole reader of the EVENTS ring buffer. Raw records are decoded,
//! passed through the consumer-side filters, and printed to stdout in the
//! configured output mode.

use std::collections::HashSet;

use aya::maps::{MapData, RingBuf};
use tracing::{debug, warn};

use crate::event::AnomalyRecord;
use crate::proctree::SubtreeFilter;
use crate::render::{self, OutputFormat};

/// Decodes, filters, and prints anomaly records pulled off the ring buffer.
pub struct Consumer {
    format: OutputFormat,
    ignore_comms: HashSet<String>,
    subtree: Option<SubtreeFilter>,
    header_written: bool,
}

impl Consumer {
    pub fn new(
        format: OutputFormat,
        ignore_comms: &[String],
        subtree: Option<SubtreeFilter>,
    ) -> Self {
        Self {
            format,
            ignore_comms: ignore_comms.iter().cloned().collect(),
            subtree,
            header_written: false,
        }
    }

    /// Print the text-mode column header. No-op for JSON output, which must
    /// stay one self-contained object per line.
    pub fn print_header(&mut self) {
        if self.format == OutputFormat::Text && !self.header_written {
            println!("{}", render::text_header());
            self.header_written = true;
        }
    }

    /// Drain every record currently available in the ring buffer. Returns
    /// the number of records pulled off (printed or suppressed).
    pub fn drain(&mut self, ring: &mut RingBuf<MapData>) -> usize {
        let mut drained = 0;
        while let Some(item) = ring.next() {
            drained += 1;
            self.consume(&item);
        }
        drained
    }

    /// Handle one raw ring-buffer record. Malformed records are skipped,
    /// never fatal.
    fn consume(&mut self, data: &[u8]) {
        let rec = match AnomalyRecord::decode(data) {
            Ok(rec) => rec,
            Err(e) => {
                warn!(error = %e, "skipping malformed ring-buffer record");
                return;
            }
        };

        if self.should_print(&rec) {
            self.print(&rec);
        }
    }

    /// Consumer-side filters, applied in order: traced subtree (wrapper
    /// mode only), then the comm ignore list.
    fn should_print(&mut self, rec: &AnomalyRecord) -> bool {
        if let Some(filter) = self.subtree.as_mut() {
            if !filter.matches(rec.pid) {
                debug!(pid = rec.pid, "anomaly outside traced subtree, suppressed");
                return false;
            }
        }
        if self.ignore_comms.contains(&rec.comm) {
            debug!(comm = %rec.comm, "anomaly from ignored command, suppressed");
            return false;
        }
        true
    }

    fn print(&mut self, rec: &AnomalyRecord) {
        match self.format {
            OutputFormat::Text => {
                self.print_header();
                println!("{}", render::text_row(rec));
            }
            OutputFormat::Json => match render::json_row(rec) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to serialize anomaly record"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use opensnag_common::OpenEvent;

    use crate::proctree::{ProcessInfo, ProcessTree};

    use super::*;

    fn make_record(pid: u32, comm: &str) -> AnomalyRecord {
        AnomalyRecord {
            pid,
            ret: -2,
            duration_ns: 1_000_000,
            comm: comm.to_string(),
            fname: "/tmp/x".to_string(),
        }
    }

    fn make_event_bytes(pid: u32, ret: i32, comm: &str, fname: &str) -> Vec<u8> {
        let mut ev = OpenEvent::zeroed();
        ev.pid = pid;
        ev.ret = ret;
        ev.duration_ns = 1_000_000;
        ev.comm[..comm.len()].copy_from_slice(comm.as_bytes());
        ev.fname[..fname.len()].copy_from_slice(fname.as_bytes());
        let ptr = &ev as *const OpenEvent as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<OpenEvent>()) }.to_vec()
    }

    fn make_proc(pid: u32, ppid: u32, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            name: name.to_string(),
        }
    }

    #[test]
    fn passes_everything_without_filters() {
        let mut consumer = Consumer::new(OutputFormat::Text, &[], None);
        assert!(consumer.should_print(&make_record(1, "cat")));
        assert!(consumer.should_print(&make_record(99999, "anything")));
    }

    #[test]
    fn ignore_comms_suppresses_by_name() {
        let ignored = vec!["systemd-journal".to_string()];
        let mut consumer = Consumer::new(OutputFormat::Text, &ignored, None);

        assert!(!consumer.should_print(&make_record(1, "systemd-journal")));
        assert!(consumer.should_print(&make_record(1, "systemd")));
    }

    #[test]
    fn subtree_filter_suppresses_outsiders() {
        let mut tree = ProcessTree::new();
        tree.insert(make_proc(100, 1, "bash"));
        tree.insert(make_proc(200, 100, "make"));
        tree.insert(make_proc(400, 1, "sshd"));
        let filter = SubtreeFilter::for_tests(100, tree);

        let mut consumer = Consumer::new(OutputFormat::Text, &[], Some(filter));
        assert!(consumer.should_print(&make_record(100, "bash")));
        assert!(consumer.should_print(&make_record(200, "make")));
        assert!(!consumer.should_print(&make_record(400, "sshd")));
    }

    #[test]
    fn subtree_and_ignore_combine() {
        let mut tree = ProcessTree::new();
        tree.insert(make_proc(100, 1, "bash"));
        tree.insert(make_proc(200, 100, "make"));
        let filter = SubtreeFilter::for_tests(100, tree);
        let ignored = vec!["make".to_string()];

        let mut consumer = Consumer::new(OutputFormat::Text, &ignored, Some(filter));
        assert!(consumer.should_print(&make_record(100, "bash")));
        // Inside the subtree but on the ignore list.
        assert!(!consumer.should_print(&make_record(200, "make")));
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let mut consumer = Consumer::new(OutputFormat::Text, &[], None);

        // Truncated garbage off the ring is skipped...
        consumer.consume(&[0u8; 7]);

        // ...and the next valid record still decodes, passes the filters,
        // and renders.
        let bytes = make_event_bytes(42, -2, "cat", "/etc/nope");
        consumer.consume(&bytes);

        let rec = AnomalyRecord::decode(&bytes).unwrap();
        assert!(consumer.should_print(&rec));
    }
}
