//! Pivot orchestration.
//!
//! Three phases around the irreversible commit point:
//!
//! - `prepare`: verify the new root, unshare the mount namespace, make
//!   `/` private, and set up the essential submounts. Any failure here
//!   aborts before anything irreversible happens.
//! - `execute`: `pivot_root(2)` with a switch_root-style fallback
//!   (chdir + mount-move + chroot), then exec the replacement command.
//!   Past a successful pivot there is no rollback; the only recovery
//!   is reboot.
//! - `cleanup_old_root`: lazily detach everything under the preserved
//!   old root, deepest mount first.

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};
use xenomorph_core::error::{Result, XenoError};

use crate::mounts::{self, MountInfo};
use crate::rootfs::verify;
use crate::sys::{self, MountFlags, UnshareFlags};

/// Poll interval for the graceful old-root cleanup.
const CLEANUP_POLL: Duration = Duration::from_millis(500);

/// Configuration for the commit phase.
#[derive(Debug, Clone)]
pub struct PivotConfig {
    /// Absolute path of the prepared new root
    pub new_root: PathBuf,

    /// Old-root mount point relative to the new root (e.g.
    /// `mnt/oldroot`)
    pub old_root_mount: String,

    /// Command exec'd in the new root after the pivot
    pub exec_cmd: Option<String>,

    /// Arguments for the exec command
    pub exec_args: Vec<String>,

    /// Leave the old root mounted after the pivot
    pub keep_old_root: bool,
}

impl PivotConfig {
    pub fn new(new_root: impl Into<PathBuf>) -> Self {
        Self {
            new_root: new_root.into(),
            old_root_mount: "mnt/oldroot".to_string(),
            exec_cmd: None,
            exec_args: Vec::new(),
            keep_old_root: true,
        }
    }
}

/// Options for the preparation phase.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Skip new-root verification
    pub skip_verify: bool,

    /// Unshare the mount namespace before touching the mount table
    pub create_namespace: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            skip_verify: false,
            create_namespace: true,
        }
    }
}

/// Outcome of the preparation phase.
#[derive(Debug, Clone)]
pub struct PrepareResult {
    /// Validated new-root path
    pub new_root: PathBuf,

    /// Whether a mount namespace was created, so cleanup knows which
    /// mounts are namespace-scoped
    pub namespace_created: bool,
}

/// Essential submounts replicated under the new root.
struct Submount {
    src: &'static str,
    tgt: &'static str,
    /// Fresh mount of this fstype; `None` means recursive bind from
    /// `src`
    fstype: Option<&'static str>,
    /// Absence tolerated?
    required: bool,
}

const ESSENTIAL_SUBMOUNTS: [Submount; 4] = [
    Submount {
        src: "/dev",
        tgt: "dev",
        fstype: None,
        required: true,
    },
    Submount {
        src: "proc",
        tgt: "proc",
        fstype: Some("proc"),
        required: true,
    },
    Submount {
        src: "sysfs",
        tgt: "sys",
        fstype: Some("sysfs"),
        required: true,
    },
    Submount {
        src: "/run",
        tgt: "run",
        fstype: None,
        required: false,
    },
];

/// Prepare the new root for the pivot.
///
/// Steps, failing on the first error: verify the rootfs, unshare the
/// mount namespace and make `/` private (without this, mounts made
/// here propagate to the host and outlive us), bind the new root onto
/// itself so it is a mount point, and replicate `/dev`, `/proc`,
/// `/sys`, and `/run` beneath it.
pub fn prepare(new_root: &Path, options: &PrepareOptions) -> Result<PrepareResult> {
    if !options.skip_verify {
        let report = verify(new_root);
        for warning in &report.warnings {
            warn!(rootfs = %new_root.display(), "{warning}");
        }
        if !report.valid {
            return Err(XenoError::PreparationFailed(format!(
                "{} is not a usable root: {}",
                new_root.display(),
                report.errors.join("; ")
            )));
        }
    }

    let mut namespace_created = false;
    if options.create_namespace {
        sys::unshare(UnshareFlags::NEWNS)
            .map_err(|e| XenoError::PreparationFailed(format!("unshare mount namespace: {e}")))?;
        mounts::make_private(Path::new("/"))
            .map_err(|e| XenoError::PreparationFailed(format!("make / private: {e}")))?;
        namespace_created = true;
        debug!("mount namespace unshared and made private");
    }

    mounts::ensure_mount_point(new_root)
        .map_err(|e| XenoError::PreparationFailed(format!("{}: {e}", new_root.display())))?;

    for submount in &ESSENTIAL_SUBMOUNTS {
        let target = new_root.join(submount.tgt);
        mounts::ensure_dir(&target)
            .map_err(|e| XenoError::PreparationFailed(format!("{}: {e}", target.display())))?;

        let outcome = match submount.fstype {
            Some(fstype) => sys::mount(
                Some(Path::new(submount.src)),
                &target,
                Some(fstype),
                MountFlags::NONE,
                None,
            ),
            None => mounts::rbind(Path::new(submount.src), &target),
        };

        if let Err(e) = outcome {
            if submount.required {
                return Err(XenoError::PreparationFailed(format!(
                    "essential submount {}: {e}",
                    target.display()
                )));
            }
            warn!(target = %target.display(), error = %e, "optional submount failed");
        }
    }

    info!(new_root = %new_root.display(), namespace_created, "pivot prepared");

    Ok(PrepareResult {
        new_root: new_root.to_path_buf(),
        namespace_created,
    })
}

/// Commit the pivot and exec the replacement command.
///
/// When `pivot_root(2)` fails (typical when the current root is an
/// initramfs), falls back to the switch_root sequence: chdir into the
/// new root, move it over `/`, chroot into it. The fallback does not
/// preserve the old root.
///
/// On success with an exec command configured this function does not
/// return.
pub fn execute(config: &PivotConfig) -> Result<()> {
    let new_root = &config.new_root;
    match fs::metadata(new_root) {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            return Err(XenoError::NewRootNotFound(
                new_root.display().to_string(),
            ))
        }
    }

    let old_root_rel = config.old_root_mount.trim_start_matches('/');
    let old_root_abs = new_root.join(old_root_rel);
    fs::create_dir_all(&old_root_abs).map_err(|e| {
        XenoError::OldRootCreationFailed(format!("{}: {e}", old_root_abs.display()))
    })?;

    // Propagation must be private on both sides of the pivot.
    // Failures here are non-fatal: an unshared namespace can already
    // be private.
    if let Err(e) = mounts::make_private(Path::new("/")) {
        warn!(error = %e, "could not make / private");
    }
    if let Err(e) = mounts::make_private(new_root) {
        warn!(error = %e, "could not make new root private");
    }

    match sys::pivot_root(new_root, &old_root_abs) {
        Ok(()) => {
            info!(new_root = %new_root.display(), "pivot_root succeeded");
            sys::chdir(Path::new("/"))
                .map_err(|e| XenoError::ChdirFailed(format!("/: {e}")))?;

            if !config.keep_old_root {
                let old_root = Path::new("/").join(old_root_rel);
                if let Err(e) = cleanup_old_root(&old_root) {
                    warn!(error = %e, "old root cleanup failed");
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "pivot_root failed; falling back to switch_root");
            switch_root(new_root)?;
        }
    }

    exec_replacement(config)
}

/// The busybox switch_root sequence, for roots where `pivot_root(2)`
/// is unavailable (initramfs).
fn switch_root(new_root: &Path) -> Result<()> {
    sys::chdir(new_root)
        .map_err(|e| XenoError::ChdirFailed(format!("{}: {e}", new_root.display())))?;

    sys::mount(
        Some(Path::new(".")),
        Path::new("/"),
        None,
        MountFlags::MOVE,
        None,
    )
    .map_err(|e| XenoError::PivotRootFailed(format!("mount move onto /: {e}")))?;

    sys::chroot(Path::new("."))
        .map_err(|e| XenoError::ChrootFailed(format!(".: {e}")))?;

    sys::chdir(Path::new("/")).map_err(|e| XenoError::ChdirFailed(format!("/: {e}")))?;

    info!("switch_root fallback complete");
    Ok(())
}

/// Replace this process with the configured command. Does not return
/// on success.
fn exec_replacement(config: &PivotConfig) -> Result<()> {
    let Some(cmd) = &config.exec_cmd else {
        return Ok(());
    };

    info!(cmd = %cmd, args = ?config.exec_args, "executing replacement command");
    let err = Command::new(cmd).args(&config.exec_args).exec();

    // exec only returns on failure.
    Err(XenoError::ExecFailed(format!("{cmd}: {err}")))
}

/// Mounts under `old_root`, deepest first, ready for teardown.
pub(crate) fn select_old_root_targets(mounts: &[MountInfo], old_root: &str) -> Vec<String> {
    let old_root = old_root.trim_end_matches('/');
    let mut targets: Vec<String> = mounts
        .iter()
        .filter(|m| m.target == old_root || m.target.starts_with(&format!("{old_root}/")))
        .map(|m| m.target.clone())
        .collect();
    targets.sort_by_key(|t| std::cmp::Reverse(t.len()));
    targets
}

/// Tear down the preserved old root.
///
/// `old_root` is the absolute path of the old-root mount inside the
/// current (post-pivot) root, e.g. `/mnt/oldroot`. Every mount below
/// it is lazily detached deepest-first; per-path failures are
/// warnings.
pub fn cleanup_old_root(old_root: &Path) -> Result<()> {
    let snapshot = mounts::read_mounts()?;
    let targets = select_old_root_targets(&snapshot, &old_root.to_string_lossy());

    info!(old_root = %old_root.display(), mounts = targets.len(), "tearing down old root");

    for target in &targets {
        if let Err(e) = mounts::umount_detach(Path::new(target)) {
            warn!(target = %target, error = %e, "lazy umount failed");
        }
    }

    if let Err(e) = mounts::umount(old_root) {
        debug!(error = %e, "plain umount of old root failed; detaching lazily");
        if let Err(e) = mounts::umount_detach(old_root) {
            warn!(error = %e, "lazy umount of old root failed");
        }
    }

    let _ = fs::remove_dir(old_root);
    Ok(())
}

/// Graceful variant: wait until no process keeps its root under
/// `old_root` (bounded by `retries` polls) before detaching.
pub fn cleanup_old_root_graceful(old_root: &Path, retries: u32) -> Result<()> {
    for attempt in 0..retries {
        if !old_root_busy(old_root) {
            break;
        }
        debug!(attempt, "old root still referenced; waiting");
        std::thread::sleep(CLEANUP_POLL);
    }
    cleanup_old_root(old_root)
}

/// Does any process still have its root link under `old_root`?
fn old_root_busy(old_root: &Path) -> bool {
    let Ok(entries) = fs::read_dir("/proc") else {
        return false;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let root_link = Path::new("/proc").join(pid.to_string()).join("root");
        if let Ok(target) = fs::read_link(&root_link) {
            if target.starts_with(old_root) {
                return true;
            }
        }
    }
    false
}
