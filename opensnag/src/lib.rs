//! opensnag: report anomalous `openat` calls observed via eBPF tracepoints.
//!
//! Two kernel programs (see `opensnag-ebpf`) watch every openat on the host
//! and publish only the calls that failed or crossed the latency threshold.
//! This crate is the user-space half: it loads and attaches the programs,
//! optionally launches a command to trace, and consumes the anomaly ring
//! buffer until a signal arrives or the traced command exits.

pub mod config;
pub mod consumer;
pub mod event;
pub mod loader;
pub mod proctree;
pub mod render;
pub mod wrapper;

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

use crate::config::Settings;
use crate::consumer::Consumer;
use crate::proctree::SubtreeFilter;
use crate::render::OutputFormat;
use crate::wrapper::TracedChild;

/// Orchestrates one tracing run: load + attach, optional traced command,
/// and the ring-buffer consumer loop.
pub struct Tracer {
    settings: Settings,
}

impl Tracer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run until SIGINT/SIGTERM, or until the traced command exits.
    pub async fn run(self) -> Result<()> {
        let settings = self.settings;

        loader::raise_memlock_limit();
        let mut ebpf = loader::load_and_attach(&settings.ebpf_obj, settings.threshold_ns)?;
        let ring = loader::take_event_ring(&mut ebpf)?;

        // Wrapper mode: launch after attach so the command's earliest opens
        // are already traced, and filter output down to its subtree.
        let mut child = if settings.command.is_empty() {
            None
        } else {
            let child = TracedChild::spawn(&settings.command)?;
            info!(pid = child.pid, "watching traced command");
            Some(child)
        };
        let subtree = child.as_ref().map(|c| SubtreeFilter::new(c.pid));

        let format = if settings.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        };
        let mut consumer = Consumer::new(format, &settings.ignore_comms, subtree);
        consumer.print_header();

        // The ring fd turns readable when the kernel publishes into an
        // empty buffer; each wakeup drains everything available.
        let mut ring = AsyncFd::with_interest(ring, Interest::READABLE)
            .context("Failed to register ring buffer with the runtime")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        info!(threshold_ns = settings.threshold_ns, "tracing openat anomalies");

        let mut child_exited = false;
        loop {
            tokio::select! {
                guard = ring.readable_mut() => {
                    let mut guard = guard.context("ring buffer poll failed")?;
                    consumer.drain(guard.get_inner_mut());
                    guard.clear_ready();
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                code = wait_child(&mut child) => {
                    info!(exit_code = ?code, "traced command exited");
                    child_exited = true;
                    break;
                }
            }
        }

        // Flush whatever the ring already held before tearing down.
        let remaining = consumer.drain(ring.get_mut());
        if remaining > 0 {
            debug!(count = remaining, "drained remaining records at shutdown");
        }

        if let Some(child) = child.take() {
            if !child_exited {
                child.terminate().await;
            }
        }

        Ok(())
    }
}

/// Resolves when the traced command exits; pends forever outside wrapper
/// mode so the select! arm never fires.
async fn wait_child(child: &mut Option<TracedChild>) -> Option<i32> {
    match child.as_mut() {
        Some(child) => child.exited().await,
        None => std::future::pending().await,
    }
}
