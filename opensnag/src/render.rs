//! Text-table and JSON-lines rendering of anomaly records.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::event::AnomalyRecord;

/// Output mode, fixed at startup. The two modes are mutually exclusive so
/// stdout is either a human table or machine-parseable JSON lines, never a
/// mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Column header for text mode, printed once at startup.
pub fn text_header() -> String {
    format!(
        "{:<8} {:<16} {:<10} {:<20} {}",
        "PID", "COMM", "LATENCY", "RESULT", "FILE"
    )
}

/// One text-mode row.
pub fn text_row(rec: &AnomalyRecord) -> String {
    format!(
        "{:<8} {:<16} {:<10} {:<20} {}",
        rec.pid,
        rec.comm,
        format_latency(rec.duration_ns),
        rec.result_label(),
        rec.fname,
    )
}

/// Humanize a nanosecond latency ("15ms", "1.2s").
fn format_latency(ns: u64) -> String {
    format!("{:?}", Duration::from_nanos(ns))
}

/// One JSON-lines object, self-contained per anomaly.
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    pid: u32,
    comm: &'a str,
    lat_ns: u64,
    result: String,
    file: &'a str,
}

impl<'a> JsonRecord<'a> {
    fn new(rec: &'a AnomalyRecord, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            pid: rec.pid,
            comm: &rec.comm,
            lat_ns: rec.duration_ns,
            result: rec.result_label(),
            file: &rec.fname,
        }
    }
}

/// One JSON-lines row, stamped with the current wall-clock time.
pub fn json_row(rec: &AnomalyRecord) -> Result<String> {
    json_row_at(rec, Utc::now())
}

fn json_row_at(rec: &AnomalyRecord, at: DateTime<Utc>) -> Result<String> {
    Ok(serde_json::to_string(&JsonRecord::new(rec, at))?)
}
