//! Typed wrappers over the raw Linux syscalls the pivot pipeline
//! depends on: `mount`, `umount2`, `pivot_root`, `chroot`, `chdir`,
//! `unshare`, and `kill`.
//!
//! Each wrapper takes validated path arguments, converts them to
//! null-terminated C strings, invokes the syscall via `libc`, and maps
//! errno into [`SyscallErrorKind`]. `pivot_root` has no libc wrapper
//! and goes through `libc::syscall(SYS_pivot_root, ..)`.

pub mod flags;

pub use flags::{MountFlags, Signal, UmountFlags, UnshareFlags};

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use xenomorph_core::error::{Result, SyscallErrorKind, XenoError};

/// Convert a path to a null-terminated C string.
fn cpath(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| XenoError::PathTooLong(path.display().to_string()))
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn syscall_error(op: &'static str, target: impl Into<String>) -> XenoError {
    XenoError::Syscall {
        op,
        target: target.into(),
        kind: SyscallErrorKind::from_errno(last_errno()),
    }
}

/// `mount(2)`.
///
/// `source`, `fstype`, and `data` are optional; absent arguments are
/// passed to the kernel as null pointers, matching the C calling
/// convention for bind mounts and propagation changes.
pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MountFlags,
    data: Option<&str>,
) -> Result<()> {
    let source = source.map(cpath).transpose()?;
    let target_c = cpath(target)?;
    let fstype = fstype
        .map(CString::new)
        .transpose()
        .map_err(|_| XenoError::PathTooLong("mount fstype".to_string()))?;
    let data = data
        .map(CString::new)
        .transpose()
        .map_err(|_| XenoError::PathTooLong("mount data".to_string()))?;

    let rc = unsafe {
        libc::mount(
            source.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            target_c.as_ptr(),
            fstype.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            flags.bits() as libc::c_ulong,
            data.as_ref()
                .map_or(ptr::null(), |s| s.as_ptr() as *const libc::c_void),
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("mount", target.display().to_string()))
    }
}

/// `umount2(2)`.
pub fn umount2(target: &Path, flags: UmountFlags) -> Result<()> {
    let target_c = cpath(target)?;

    let rc = unsafe { libc::umount2(target_c.as_ptr(), flags.bits()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("umount2", target.display().to_string()))
    }
}

/// `pivot_root(2)`.
///
/// `put_old` must be a directory at or beneath `new_root`; the kernel
/// rejects anything else with `EINVAL`.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    let new_root_c = cpath(new_root)?;
    let put_old_c = cpath(put_old)?;

    let rc = unsafe {
        libc::syscall(
            libc::SYS_pivot_root,
            new_root_c.as_ptr(),
            put_old_c.as_ptr(),
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("pivot_root", new_root.display().to_string()))
    }
}

/// `chroot(2)`.
pub fn chroot(path: &Path) -> Result<()> {
    let path_c = cpath(path)?;

    let rc = unsafe { libc::chroot(path_c.as_ptr()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("chroot", path.display().to_string()))
    }
}

/// `chdir(2)`.
pub fn chdir(path: &Path) -> Result<()> {
    let path_c = cpath(path)?;

    let rc = unsafe { libc::chdir(path_c.as_ptr()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("chdir", path.display().to_string()))
    }
}

/// `unshare(2)`.
pub fn unshare(flags: UnshareFlags) -> Result<()> {
    let rc = unsafe { libc::unshare(flags.bits()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("unshare", format!("flags {:#x}", flags.bits())))
    }
}

/// `kill(2)`.
pub fn kill(pid: i32, signal: Signal) -> Result<()> {
    let rc = unsafe { libc::kill(pid, signal.number()) };

    if rc == 0 {
        Ok(())
    } else {
        Err(syscall_error("kill", format!("pid {pid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpath_rejects_embedded_nul() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/tmp/bad\0path"));
        match cpath(path) {
            Err(XenoError::PathTooLong(_)) => {}
            other => panic!("expected PathTooLong, got {other:?}"),
        }
    }

    #[test]
    fn test_kill_nonexistent_pid() {
        // pid_max caps real pids well below i32::MAX.
        let err = kill(i32::MAX, Signal::Term).unwrap_err();
        match err {
            XenoError::Syscall { op, kind, .. } => {
                assert_eq!(op, "kill");
                assert_eq!(kind, SyscallErrorKind::Unexpected(libc::ESRCH));
            }
            other => panic!("expected Syscall error, got {other:?}"),
        }
    }

    #[test]
    fn test_chdir_missing_directory() {
        let err = chdir(Path::new("/nonexistent-xenomorph-test-dir")).unwrap_err();
        match err {
            XenoError::Syscall { op, kind, .. } => {
                assert_eq!(op, "chdir");
                assert_eq!(kind, SyscallErrorKind::NoSuchFileOrDirectory);
            }
            other => panic!("expected Syscall error, got {other:?}"),
        }
    }
}
