//! Decoding raw ring-buffer records into reportable anomaly records.

use std::mem;

use thiserror::Error;

use opensnag_common::OpenEvent;

/// Error decoding a raw ring-buffer record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("undersized record: got {got} bytes, expected {want}")]
    Undersized { got: usize, want: usize },
}

/// A single anomalous openat call, decoded and ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyRecord {
    pub pid: u32,
    pub ret: i32,
    pub duration_ns: u64,
    pub comm: String,
    pub fname: String,
}

impl AnomalyRecord {
    /// Decode one raw ring-buffer record.
    ///
    /// Trailing NUL padding in the comm and fname buffers is trimmed away.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let want = mem::size_of::<OpenEvent>();
        if data.len() < want {
            return Err(DecodeError::Undersized {
                got: data.len(),
                want,
            });
        }

        // Safety: OpenEvent is #[repr(C)], Copy, and we verified the buffer
        // is large enough.
        let raw: OpenEvent =
            unsafe { std::ptr::read_unaligned(data.as_ptr() as *const OpenEvent) };

        Ok(Self {
            pid: raw.pid,
            ret: raw.ret,
            duration_ns: raw.duration_ns,
            comm: bytes_to_string(&raw.comm),
            fname: bytes_to_string(&raw.fname),
        })
    }

    /// Human-readable form of the openat return value.
    pub fn result_label(&self) -> String {
        result_label(self.ret)
    }
}

/// Convert a null-padded byte array into a String, trimming at the first null.
fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Map an openat return value to its display form. Success (a new fd) renders
/// as OK; the errnos openat commonly fails with get their symbolic name; any
/// other failure renders generically with its numeric value.
pub fn result_label(ret: i32) -> String {
    if ret >= 0 {
        return "OK".to_string();
    }
    match -ret {
        1 => "EPERM (op not permitted)".to_string(),
        2 => "ENOENT (no such entry)".to_string(),
        13 => "EACCES (permission denied)".to_string(),
        17 => "EEXIST (already exists)".to_string(),
        24 => "EMFILE (too many open handles)".to_string(),
        n => format!("ERR({n})"),
    }
}
