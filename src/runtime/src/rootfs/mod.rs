//! Root filesystem materialization and validation.

pub mod builder;
pub mod verify;

pub use builder::{build, check_available_memory, estimate_image_size, BuildOptions, BuildResult};
pub use verify::{is_valid, verify, VerifyReport};
