//! Configuration: TOML file settings merged with CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use opensnag_common::THRESHOLD_ERRORS_ONLY;

/// Default latency threshold in milliseconds.
fn default_threshold_ms() -> u64 {
    10
}

/// On-disk configuration. Every field is optional; CLI flags win over it.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub trace: TraceSection,
}

#[derive(Debug, Deserialize)]
pub struct TraceSection {
    /// Latency threshold in milliseconds (0 reports every call).
    #[serde(default = "default_threshold_ms")]
    pub threshold_ms: u64,
    /// Report failed opens only, regardless of latency.
    #[serde(default)]
    pub errors_only: bool,
    /// JSON-lines output instead of the text table.
    #[serde(default)]
    pub json: bool,
    /// Command names whose anomalies are suppressed at the consumer.
    #[serde(default)]
    pub ignore_comms: Vec<String>,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            threshold_ms: default_threshold_ms(),
            errors_only: false,
            json: false,
            ignore_comms: Vec::new(),
        }
    }
}

impl FileConfig {
    /// Read and parse the config file, returning defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

/// Fully resolved runtime settings: file config with CLI overrides applied
/// and the threshold translated to nanoseconds.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Anomaly latency threshold, injected into the eBPF programs at load.
    pub threshold_ns: u64,
    /// JSON-lines output.
    pub json: bool,
    /// Comm names suppressed at the consumer.
    pub ignore_comms: Vec<String>,
    /// Path to the compiled eBPF object.
    pub ebpf_obj: PathBuf,
    /// Command to launch and trace; empty means system-wide mode.
    pub command: Vec<String>,
}

impl Settings {
    /// Merge the config file with CLI flags. Boolean flags can only turn a
    /// behavior on (they have no "explicitly off" form), the threshold flag
    /// replaces the file value outright.
    pub fn resolve(
        file: FileConfig,
        threshold_ms: Option<u64>,
        errors_only: bool,
        json: bool,
        ebpf_obj: PathBuf,
        command: Vec<String>,
    ) -> Self {
        let trace = file.trace;
        let errors_only = errors_only || trace.errors_only;
        let threshold_ms = threshold_ms.unwrap_or(trace.threshold_ms);
        let threshold_ns = if errors_only {
            THRESHOLD_ERRORS_ONLY
        } else {
            threshold_ms.saturating_mul(1_000_000)
        };

        Self {
            threshold_ns,
            json: json || trace.json,
            ignore_comms: trace.ignore_comms,
            ebpf_obj,
            command,
        }
    }
}
