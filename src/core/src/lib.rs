//! Xenomorph Core - Foundational Types
//!
//! Error taxonomy and pipeline configuration shared by the runtime
//! and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{Result, SyscallErrorKind, XenoError};

/// Xenomorph version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
