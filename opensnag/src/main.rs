//! opensnag binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use opensnag::config::{FileConfig, Settings};
use opensnag::Tracer;

/// opensnag - trace slow and failing openat calls via eBPF.
#[derive(Parser, Debug)]
#[command(name = "opensnag", version, about)]
struct Args {
    /// Latency threshold in milliseconds (0 reports every call).
    #[arg(long = "ms", value_name = "MS")]
    threshold_ms: Option<u64>,

    /// Report failed opens only, regardless of latency.
    #[arg(long)]
    errors_only: bool,

    /// Emit one JSON object per anomaly instead of the text table.
    #[arg(long)]
    json: bool,

    /// Path to configuration file.
    #[arg(long, default_value = "~/.config/opensnag/config.toml")]
    config: String,

    /// Path to the compiled eBPF object.
    #[arg(long, default_value = "/usr/local/lib/opensnag/opensnag-ebpf.o")]
    ebpf_obj: PathBuf,

    /// Command to launch and trace, with its arguments (after --).
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the anomaly output on stdout stays parseable,
    // whichever mode is active.
    let env_filter =
        EnvFilter::try_from_env("OPENSNAG_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = expand_tilde(&args.config);
    let file_config = FileConfig::load(&config_path).context("loading configuration")?;
    let settings = Settings::resolve(
        file_config,
        args.threshold_ms,
        args.errors_only,
        args.json,
        args.ebpf_obj,
        args.command,
    );

    Tracer::new(settings).run().await
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
