//! `/proc` process scanning.

use std::fs;
use std::path::Path;

use xenomorph_core::error::{Result, XenoError};

/// Snapshot of one process, read from `/proc/<pid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    /// Command name from `stat`, without the surrounding parentheses
    pub comm: String,
    /// Command line with NUL separators replaced by spaces
    pub cmdline: String,
    /// State character from `stat` (R, S, D, Z, ...)
    pub state: char,
    pub uid: u32,
    pub gid: u32,
}

impl ProcessInfo {
    /// Kernel threads have ppid 0 or 2, or a bracketed comm.
    pub fn is_kernel_thread(&self) -> bool {
        self.ppid == 0 || self.ppid == 2 || self.comm.starts_with('[')
    }

    pub fn is_init(&self) -> bool {
        self.pid == 1
    }

    pub fn is_self(&self) -> bool {
        self.pid == std::process::id() as i32
    }
}

/// Enumerate all processes currently visible in `/proc`.
///
/// Processes that vanish mid-scan are silently skipped.
pub fn scan_processes() -> Result<Vec<ProcessInfo>> {
    let entries = fs::read_dir("/proc")
        .map_err(|e| XenoError::ProcNotAvailable(format!("/proc: {e}")))?;

    let mut processes = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        if let Some(info) = read_process(pid) {
            processes.push(info);
        }
    }

    Ok(processes)
}

/// Read one process from `/proc/<pid>`, or `None` if it vanished.
fn read_process(pid: i32) -> Option<ProcessInfo> {
    let proc_dir = Path::new("/proc").join(pid.to_string());

    let stat = fs::read_to_string(proc_dir.join("stat")).ok()?;
    let (comm, state, ppid) = parse_stat(&stat)?;

    let cmdline = fs::read(proc_dir.join("cmdline"))
        .map(|bytes| parse_cmdline(&bytes))
        .unwrap_or_default();

    let (uid, gid) = fs::read_to_string(proc_dir.join("status"))
        .map(|content| parse_status_ids(&content))
        .unwrap_or((0, 0));

    Some(ProcessInfo {
        pid,
        ppid,
        comm,
        cmdline,
        state,
        uid,
        gid,
    })
}

/// Parse `/proc/<pid>/stat`.
///
/// The comm field sits between the first `(` and the last `)`; it may
/// itself contain spaces and parentheses. The state character and the
/// ppid follow.
pub(crate) fn parse_stat(content: &str) -> Option<(String, char, i32)> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close <= open {
        return None;
    }

    let comm = content[open + 1..close].to_string();

    let mut fields = content[close + 1..].split_ascii_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;

    Some((comm, state, ppid))
}

/// Replace NUL separators in `/proc/<pid>/cmdline` with spaces.
pub(crate) fn parse_cmdline(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\0', " ")
        .trim_end()
        .to_string()
}

/// Extract the real uid and gid from `/proc/<pid>/status` (first
/// field after the tab on the `Uid:` and `Gid:` lines).
pub(crate) fn parse_status_ids(content: &str) -> (u32, u32) {
    let mut uid = 0;
    let mut gid = 0;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            if let Some(value) = rest.split_ascii_whitespace().next() {
                uid = value.parse().unwrap_or(0);
            }
        } else if let Some(rest) = line.strip_prefix("Gid:") {
            if let Some(value) = rest.split_ascii_whitespace().next() {
                gid = value.parse().unwrap_or(0);
            }
        }
    }

    (uid, gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_simple() {
        let (comm, state, ppid) =
            parse_stat("1234 (bash) S 1 1234 1234 34816 1234 4194304").unwrap();
        assert_eq!(comm, "bash");
        assert_eq!(state, 'S');
        assert_eq!(ppid, 1);
    }

    #[test]
    fn test_parse_stat_comm_with_spaces_and_parens() {
        let (comm, state, ppid) =
            parse_stat("567 (tmux: server (1)) R 89 567 567 0 -1").unwrap();
        assert_eq!(comm, "tmux: server (1)");
        assert_eq!(state, 'R');
        assert_eq!(ppid, 89);
    }

    #[test]
    fn test_parse_stat_malformed() {
        assert!(parse_stat("garbage").is_none());
        assert!(parse_stat("1 (unclosed S 1").is_none());
    }

    #[test]
    fn test_parse_cmdline_nul_separated() {
        assert_eq!(
            parse_cmdline(b"/usr/bin/daemon\0--flag\0value\0"),
            "/usr/bin/daemon --flag value"
        );
    }

    #[test]
    fn test_parse_cmdline_empty() {
        assert_eq!(parse_cmdline(b""), "");
    }

    #[test]
    fn test_parse_status_ids() {
        let content = "\
Name:\tdaemon
Uid:\t1000\t1000\t1000\t1000
Gid:\t998\t998\t998\t998
";
        assert_eq!(parse_status_ids(content), (1000, 998));
    }

    #[test]
    fn test_parse_status_ids_missing() {
        assert_eq!(parse_status_ids("Name:\tx\n"), (0, 0));
    }

    #[test]
    fn test_kernel_thread_predicate() {
        let mut info = ProcessInfo {
            pid: 42,
            ppid: 2,
            comm: "kworker/0:1".to_string(),
            cmdline: String::new(),
            state: 'I',
            uid: 0,
            gid: 0,
        };
        assert!(info.is_kernel_thread());

        info.ppid = 100;
        assert!(!info.is_kernel_thread());

        info.comm = "[migration/0]".to_string();
        assert!(info.is_kernel_thread());
    }

    #[test]
    fn test_scan_finds_self() {
        let processes = scan_processes().unwrap();
        let own_pid = std::process::id() as i32;
        assert!(processes.iter().any(|p| p.pid == own_pid));
    }
}
