//! Mount toolbox built on the raw syscall surface.
//!
//! Higher-level primitives for bind/move/tmpfs mounts, propagation
//! changes, and `/proc/mounts` snapshots.

use std::fs;
use std::path::Path;

use tracing::debug;
use xenomorph_core::error::{Result, XenoError};

use crate::sys::{self, MountFlags, UmountFlags};

/// One entry of a `/proc/mounts` snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub options: String,
}

/// Parse `/proc/mounts` content. Fields are separated by ASCII space;
/// the four leading fields are source, target, fstype, and options.
/// Trailing fields (dump, pass) are ignored, as are malformed lines.
pub fn parse_mounts(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(' ');
            Some(MountInfo {
                source: fields.next()?.to_string(),
                target: fields.next()?.to_string(),
                fstype: fields.next()?.to_string(),
                options: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// Read a snapshot of the current mount table.
pub fn read_mounts() -> Result<Vec<MountInfo>> {
    let content = fs::read_to_string("/proc/mounts")
        .map_err(|e| XenoError::ProcNotAvailable(format!("/proc/mounts: {e}")))?;
    Ok(parse_mounts(&content))
}

/// Bind-mount `source` onto `target`.
pub fn bind(source: &Path, target: &Path) -> Result<()> {
    debug!(source = %source.display(), target = %target.display(), "bind mount");
    sys::mount(Some(source), target, None, MountFlags::BIND, None)
}

/// Recursively bind-mount `source` onto `target`, including submounts.
pub fn rbind(source: &Path, target: &Path) -> Result<()> {
    debug!(source = %source.display(), target = %target.display(), "recursive bind mount");
    sys::mount(
        Some(source),
        target,
        None,
        MountFlags::BIND | MountFlags::REC,
        None,
    )
}

/// Atomically move a mount from `source` to `target`.
pub fn move_mount(source: &Path, target: &Path) -> Result<()> {
    debug!(source = %source.display(), target = %target.display(), "move mount");
    sys::mount(Some(source), target, None, MountFlags::MOVE, None)
}

/// Format the data string for a sized tmpfs.
pub(crate) fn tmpfs_options(size_bytes: u64) -> String {
    format!("size={size_bytes},mode=0755")
}

/// Mount a tmpfs of `size_bytes` at `target`, creating the directory
/// if needed.
pub fn mount_tmpfs(target: &Path, size_bytes: u64) -> Result<()> {
    ensure_dir(target)?;
    debug!(target = %target.display(), size_bytes, "mounting tmpfs");
    sys::mount(
        Some(Path::new("tmpfs")),
        target,
        Some("tmpfs"),
        MountFlags::NONE,
        Some(&tmpfs_options(size_bytes)),
    )
}

/// Unmount `target`.
pub fn umount(target: &Path) -> Result<()> {
    sys::umount2(target, UmountFlags::NONE)
}

/// Lazily unmount `target`: detach it now, release it once unused.
pub fn umount_detach(target: &Path) -> Result<()> {
    sys::umount2(target, UmountFlags::DETACH)
}

/// Recursively mark `target` as a private mount: events no longer
/// propagate out of this namespace.
pub fn make_private(target: &Path) -> Result<()> {
    debug!(target = %target.display(), "making mount private");
    sys::mount(
        None,
        target,
        None,
        MountFlags::PRIVATE | MountFlags::REC,
        None,
    )
}

/// Recursively mark `target` as a shared mount.
pub fn make_shared(target: &Path) -> Result<()> {
    debug!(target = %target.display(), "making mount shared");
    sys::mount(
        None,
        target,
        None,
        MountFlags::SHARED | MountFlags::REC,
        None,
    )
}

/// Whether `path` is currently a mount point, judged against the
/// `/proc/mounts` snapshot.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let canonical = fs::canonicalize(path)?;
    let canonical = canonical.to_string_lossy();
    Ok(read_mounts()?.iter().any(|m| m.target == canonical))
}

/// Create `path` and all missing parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Guarantee that `path` is a mount point, bind-mounting it onto
/// itself if it is not one already. `pivot_root(2)` requires its new
/// root to be a mount point.
pub fn ensure_mount_point(path: &Path) -> Result<()> {
    ensure_dir(path)?;
    if !is_mount_point(path)? {
        bind(path, path)?;
    }
    Ok(())
}

/// Mount an overlay filesystem at `target`. Not used by the pivot
/// pipeline itself; kept for operators layering a writable tree over
/// a read-only image.
pub fn mount_overlay(lower: &Path, upper: &Path, work: &Path, target: &Path) -> Result<()> {
    ensure_dir(upper)?;
    ensure_dir(work)?;
    ensure_dir(target)?;
    let data = format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.display(),
        upper.display(),
        work.display()
    );
    debug!(target = %target.display(), "mounting overlay");
    sys::mount(
        Some(Path::new("overlay")),
        target,
        Some("overlay"),
        MountFlags::NONE,
        Some(&data),
    )
}
