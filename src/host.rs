//! # Host — Distributed-Computing Client Abstraction
//!
//! The engine never touches the filesystem or the process clock directly;
//! everything goes through a `HostClient`, the narrow contract offered by
//! the distributed-computing client this worker runs under: resolved
//! filenames, progress fractions, critical sections (windows during which
//! the client must not suspend or kill the worker), daily trickle-up
//! messages, and a cooperative stop request.
//!
//! `StandaloneHost` is the implementation used outside any client: files
//! resolve into a base directory, progress goes to stdout, trickles are
//! suppressed, and critical sections only keep a balance counter.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, for checkpointed trickle timestamps.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub trait HostClient: Send + Sync {
    /// Map a logical filename to the path the client wants it at.
    fn resolve_filename(&self, name: &str) -> PathBuf;
    /// True when running without a controlling client.
    fn is_standalone(&self) -> bool;
    /// Report the completed fraction of the workunit.
    fn fraction_done(&self, fraction: f64);
    fn begin_critical_section(&self);
    fn end_critical_section(&self);
    /// Signal that a checkpoint has been durably written.
    fn checkpoint_completed(&self);
    /// Send a trickle-up message of the given variety.
    fn send_trickle_up(&self, variety: &str, message: &str);
    /// CPU seconds consumed so far, for trickle accounting.
    fn cpu_time(&self) -> f64;
    /// Wall-clock seconds since the run (or a prior resumed run) started.
    fn elapsed_time(&self) -> f64;
    /// True when the client has asked the worker to wind down.
    fn is_stop_requested(&self) -> bool;
}

pub struct StandaloneHost {
    base: PathBuf,
    start: Instant,
    critical_depth: AtomicU32,
    stop: AtomicBool,
}

impl StandaloneHost {
    pub fn new(base: impl AsRef<Path>) -> Self {
        StandaloneHost {
            base: base.as_ref().to_path_buf(),
            start: Instant::now(),
            critical_depth: AtomicU32::new(0),
            stop: AtomicBool::new(false),
        }
    }

    /// Ask the engine to stop at the next batch boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl HostClient for StandaloneHost {
    fn resolve_filename(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    fn is_standalone(&self) -> bool {
        true
    }

    fn fraction_done(&self, fraction: f64) {
        tracing::debug!(fraction, "progress");
    }

    fn begin_critical_section(&self) {
        self.critical_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn end_critical_section(&self) {
        let prev = self.critical_depth.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "unbalanced critical section");
    }

    fn checkpoint_completed(&self) {}

    fn send_trickle_up(&self, _variety: &str, _message: &str) {}

    fn cpu_time(&self) -> f64 {
        // no per-thread accounting standalone; wall clock is close enough
        self.start.elapsed().as_secs_f64()
    }

    fn elapsed_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_into_base_dir() {
        let h = StandaloneHost::new("/tmp/work");
        assert_eq!(h.resolve_filename("factors.txt"), PathBuf::from("/tmp/work/factors.txt"));
    }

    #[test]
    fn critical_sections_balance() {
        let h = StandaloneHost::new(".");
        h.begin_critical_section();
        h.begin_critical_section();
        h.end_critical_section();
        h.end_critical_section();
    }

    #[test]
    fn stop_request_is_sticky() {
        let h = StandaloneHost::new(".");
        assert!(!h.is_stop_requested());
        h.request_stop();
        assert!(h.is_stop_requested());
    }
}
