//! Resolved pipeline configuration.
//!
//! Holds the user-facing options for the `pivot` command after CLI
//! parsing, with their documented defaults.

use std::path::PathBuf;

use crate::error::{Result, XenoError};

/// Default command executed in the new root after the pivot.
pub const DEFAULT_EXEC: &str = "/bin/sh";

/// Default mount point for the old root, inside the new root.
pub const DEFAULT_OLD_ROOT: &str = "/mnt/oldroot";

/// Default OCI blob cache directory.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/xenomorph";

/// Default directory where the new root filesystem is materialized.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/xenomorph/rootfs";

/// Default deadline for service shutdown and init quiescence, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolved options for a single `pivot` invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Image reference, OCI layout directory, or tarball path
    pub image: String,

    /// Command executed in the new root after the pivot
    pub exec_cmd: String,

    /// Arguments appended to the exec command
    pub exec_args: Vec<String>,

    /// Absolute mount point for the old root (e.g. `/mnt/oldroot`)
    pub old_root_mount: String,

    /// Keep the old root mounted after the pivot
    pub keep_old_root: bool,

    /// Skip the interactive confirmation prompt
    pub force: bool,

    /// Deadline for service shutdown and init quiescence, in seconds
    pub timeout_secs: u64,

    /// Skip init system coordination entirely
    pub skip_init_coord: bool,

    /// Skip new-root verification
    pub skip_verify: bool,

    /// OCI blob cache root
    pub cache_dir: PathBuf,

    /// Directory where the new root filesystem is materialized
    pub work_dir: PathBuf,

    /// Print the planned steps and exit without side effects
    pub dry_run: bool,
}

impl PipelineConfig {
    /// Create a configuration for `image` with all defaults applied.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            exec_cmd: DEFAULT_EXEC.to_string(),
            exec_args: Vec::new(),
            old_root_mount: DEFAULT_OLD_ROOT.to_string(),
            keep_old_root: true,
            force: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            skip_init_coord: false,
            skip_verify: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            dry_run: false,
        }
    }

    /// Validate the configuration before the pipeline starts.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(XenoError::Config("image reference is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(XenoError::Config(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if !self.old_root_mount.starts_with('/') {
            return Err(XenoError::Config(format!(
                "old root mount point must be absolute: {}",
                self.old_root_mount
            )));
        }
        if self.exec_cmd.trim().is_empty() {
            return Err(XenoError::Config("exec command is empty".to_string()));
        }
        Ok(())
    }

    /// The old-root mount point relative to the new root, as consumed
    /// by `pivot_root(2)`'s `put_old` argument.
    pub fn old_root_relative(&self) -> &str {
        self.old_root_mount.trim_start_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("alpine");
        assert_eq!(config.exec_cmd, "/bin/sh");
        assert_eq!(config.old_root_mount, "/mnt/oldroot");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.keep_old_root);
        assert!(!config.force);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = PipelineConfig::new("alpine");
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_image_rejected() {
        let config = PipelineConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_old_root_rejected() {
        let mut config = PipelineConfig::new("alpine");
        config.old_root_mount = "mnt/oldroot".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_old_root_relative_strips_leading_slash() {
        let config = PipelineConfig::new("alpine");
        assert_eq!(config.old_root_relative(), "mnt/oldroot");
    }
}
