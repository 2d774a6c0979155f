//! Xenomorph runtime.
//!
//! Everything between the CLI and the kernel: the raw syscall
//! surface, the mount toolbox, OCI rootfs building and verification,
//! process termination, init coordination, and the pivot pipeline
//! itself.

pub mod initsys;
pub mod mounts;
pub mod oci;
pub mod pivot;
pub mod process;
pub mod rootfs;
pub mod sys;

pub use initsys::{detect, running_in_container, Coordinator, InitInfo, InitSystem};
pub use mounts::MountInfo;
pub use oci::{BlobCache, ImageConfig, ImageReference};
pub use pivot::{cleanup_old_root, execute, prepare, PivotConfig, PrepareOptions, PrepareResult};
pub use process::{terminate_all, TerminateOptions, TerminateResult};
pub use rootfs::{
    build, check_available_memory, estimate_image_size, is_valid, verify, BuildOptions,
    BuildResult, VerifyReport,
};
