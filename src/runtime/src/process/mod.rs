//! Process subsystem.
//!
//! Scans `/proc`, classifies essential versus non-essential processes,
//! and terminates non-essentials with SIGTERM → SIGKILL escalation.

pub mod essential;
pub mod scan;
pub mod terminate;

pub use essential::{categorize, is_essential, EssentialCategory};
pub use scan::{scan_processes, ProcessInfo};
pub use terminate::{terminate_all, TerminateOptions, TerminateResult};
