//! Non-essential process termination.
//!
//! SIGTERM to every victim, a bounded wait for voluntary exit, then
//! SIGKILL escalation. Per-pid signal failures are logged and skipped;
//! pids that survive even SIGKILL are reported as stubborn but never
//! fail the pipeline.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use xenomorph_core::error::Result;

use super::essential::is_essential;
use super::scan::{scan_processes, ProcessInfo};
use crate::sys::{self, Signal};

/// Poll interval while waiting for victims to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for a termination sweep.
#[derive(Debug, Clone)]
pub struct TerminateOptions {
    /// How long to wait for voluntary exit after SIGTERM
    pub graceful_timeout_ms: u64,

    /// How long to wait after SIGKILL before declaring pids stubborn
    pub forceful_timeout_ms: u64,

    /// Leave essential processes alone
    pub skip_essential: bool,

    /// Additional pids to spare
    pub exclude_pids: Vec<i32>,
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: 5000,
            forceful_timeout_ms: 2000,
            skip_essential: true,
            exclude_pids: Vec::new(),
        }
    }
}

/// Outcome of a termination sweep.
#[derive(Debug, Clone, Default)]
pub struct TerminateResult {
    /// Victims that are gone: graceful exits plus SIGKILLed pids
    pub terminated_count: usize,

    /// Victims that needed SIGKILL
    pub killed_count: usize,

    /// Pids still alive after the forceful timeout
    pub stubborn_pids: Vec<i32>,
}

/// Pick the pids a sweep will signal. Kernel threads, init, the
/// current process and its parent, excluded pids, and (by default)
/// essential processes are all spared.
pub(crate) fn select_victims(
    processes: &[ProcessInfo],
    options: &TerminateOptions,
    self_pid: i32,
    parent_pid: i32,
) -> Vec<i32> {
    processes
        .iter()
        .filter(|p| !p.is_kernel_thread())
        .filter(|p| !p.is_init())
        .filter(|p| p.pid != self_pid && p.pid != parent_pid)
        .filter(|p| !options.exclude_pids.contains(&p.pid))
        .filter(|p| !options.skip_essential || !is_essential(p))
        .map(|p| p.pid)
        .collect()
}

/// Terminate all non-essential processes on the system.
pub fn terminate_all(options: &TerminateOptions) -> Result<TerminateResult> {
    let processes = scan_processes()?;
    let self_pid = nix::unistd::getpid().as_raw();
    let parent_pid = nix::unistd::getppid().as_raw();

    let victims = select_victims(&processes, options, self_pid, parent_pid);
    info!(
        total = processes.len(),
        victims = victims.len(),
        "terminating non-essential processes"
    );

    Ok(escalate(&victims, options))
}

/// Signal the given pids: SIGTERM, bounded wait, SIGKILL, final sweep.
pub(crate) fn escalate(victims: &[i32], options: &TerminateOptions) -> TerminateResult {
    for &pid in victims {
        match sys::kill(pid, Signal::Term) {
            Ok(()) => debug!(pid, "sent SIGTERM"),
            Err(e) => warn!(pid, error = %e, "failed to send SIGTERM"),
        }
    }

    wait_for_exits(victims, Duration::from_millis(options.graceful_timeout_ms));

    let killed: Vec<i32> = victims.iter().copied().filter(|&pid| pid_alive(pid)).collect();
    for &pid in &killed {
        match sys::kill(pid, Signal::Kill) {
            Ok(()) => debug!(pid, "sent SIGKILL"),
            Err(e) => warn!(pid, error = %e, "failed to send SIGKILL"),
        }
    }

    if !killed.is_empty() {
        std::thread::sleep(Duration::from_millis(options.forceful_timeout_ms));
    }

    let stubborn: Vec<i32> = killed.iter().copied().filter(|&pid| pid_alive(pid)).collect();
    if !stubborn.is_empty() {
        warn!(?stubborn, "processes survived SIGKILL");
    }

    let exited_gracefully = victims.len() - killed.len();
    TerminateResult {
        terminated_count: exited_gracefully + killed.len(),
        killed_count: killed.len(),
        stubborn_pids: stubborn,
    }
}

/// Poll until all pids are gone or the deadline passes.
fn wait_for_exits(pids: &[i32], timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if !pids.iter().any(|&pid| pid_alive(pid)) {
            return;
        }
        if Instant::now() >= deadline {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Liveness probe: does `/proc/<pid>` still exist?
fn pid_alive(pid: i32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
