//! Essential-process classification.
//!
//! A process is essential when killing it would take down the host
//! before the pivot completes: PID 1, kernel threads, the xenomorph
//! process itself, and a fixed table of system daemons matched by
//! name prefix.

use super::scan::ProcessInfo;

/// Why a process is considered essential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssentialCategory {
    Kernel,
    Init,
    SelfProcess,
    Device,
    Logging,
    Network,
    Storage,
    Other,
}

/// Fixed name table; a comm equal to or starting with an entry marks
/// the process essential.
const ESSENTIAL_NAMES: &[(&str, EssentialCategory)] = &[
    // kernel threads (usually caught by the ppid heuristic already)
    ("kthreadd", EssentialCategory::Kernel),
    ("ksoftirqd", EssentialCategory::Kernel),
    ("kworker", EssentialCategory::Kernel),
    ("migration", EssentialCategory::Kernel),
    ("watchdog", EssentialCategory::Kernel),
    ("kcompactd", EssentialCategory::Kernel),
    ("khugepaged", EssentialCategory::Kernel),
    ("kswapd", EssentialCategory::Kernel),
    ("kblockd", EssentialCategory::Kernel),
    // init systems
    ("systemd", EssentialCategory::Init),
    ("init", EssentialCategory::Init),
    ("openrc", EssentialCategory::Init),
    ("runit", EssentialCategory::Init),
    ("s6-svscan", EssentialCategory::Init),
    // device management
    ("udevd", EssentialCategory::Device),
    ("systemd-udevd", EssentialCategory::Device),
    ("eudev", EssentialCategory::Device),
    ("mdev", EssentialCategory::Device),
    // logging
    ("journald", EssentialCategory::Logging),
    ("systemd-journald", EssentialCategory::Logging),
    ("rsyslogd", EssentialCategory::Logging),
    ("syslog-ng", EssentialCategory::Logging),
    // networking
    ("dhclient", EssentialCategory::Network),
    ("dhcpcd", EssentialCategory::Network),
    ("NetworkManager", EssentialCategory::Network),
    ("wpa_supplicant", EssentialCategory::Network),
    // storage
    ("lvmetad", EssentialCategory::Storage),
    ("multipathd", EssentialCategory::Storage),
    ("iscsid", EssentialCategory::Storage),
];

/// Look up a comm in the fixed name table.
fn name_category(comm: &str) -> Option<EssentialCategory> {
    ESSENTIAL_NAMES
        .iter()
        .find(|(name, _)| comm == *name || comm.starts_with(name))
        .map(|(_, category)| *category)
}

/// Whether terminating this process would endanger the pipeline.
pub fn is_essential(info: &ProcessInfo) -> bool {
    info.is_init()
        || info.is_kernel_thread()
        || info.is_self()
        || name_category(&info.comm).is_some()
}

/// The category a process falls into; `Other` for non-essentials.
pub fn categorize(info: &ProcessInfo) -> EssentialCategory {
    if info.is_init() {
        return EssentialCategory::Init;
    }
    if info.is_self() {
        return EssentialCategory::SelfProcess;
    }
    if info.is_kernel_thread() {
        return EssentialCategory::Kernel;
    }
    name_category(&info.comm).unwrap_or(EssentialCategory::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: i32, ppid: i32, comm: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            comm: comm.to_string(),
            cmdline: String::new(),
            state: 'S',
            uid: 0,
            gid: 0,
        }
    }

    #[test]
    fn test_init_is_essential() {
        let info = proc(1, 0, "systemd");
        assert!(is_essential(&info));
        assert_eq!(categorize(&info), EssentialCategory::Init);
    }

    #[test]
    fn test_self_is_essential() {
        let info = proc(std::process::id() as i32, 100, "xenomorph");
        assert!(is_essential(&info));
        assert_eq!(categorize(&info), EssentialCategory::SelfProcess);
    }

    #[test]
    fn test_kernel_thread_is_essential() {
        let info = proc(123, 2, "oot_flush");
        assert!(is_essential(&info));
        assert_eq!(categorize(&info), EssentialCategory::Kernel);
    }

    #[test]
    fn test_bracketed_comm_is_essential() {
        let info = proc(456, 100, "[rcu_sched]");
        assert!(is_essential(&info));
    }

    #[test]
    fn test_prefix_match_is_monotone() {
        // If a name matches the table, any comm extending it matches
        // too.
        assert!(is_essential(&proc(789, 100, "kworker")));
        assert!(is_essential(&proc(789, 100, "kworker/3:2-events")));
        assert!(is_essential(&proc(790, 100, "dhclient")));
        assert!(is_essential(&proc(790, 100, "dhclient-script")));
    }

    #[test]
    fn test_daemon_categories() {
        assert_eq!(
            categorize(&proc(200, 100, "systemd-journald")),
            EssentialCategory::Init
        );
        assert_eq!(
            categorize(&proc(201, 100, "udevd")),
            EssentialCategory::Device
        );
        assert_eq!(
            categorize(&proc(202, 100, "rsyslogd")),
            EssentialCategory::Logging
        );
        assert_eq!(
            categorize(&proc(203, 100, "NetworkManager")),
            EssentialCategory::Network
        );
        assert_eq!(
            categorize(&proc(204, 100, "multipathd")),
            EssentialCategory::Storage
        );
    }

    #[test]
    fn test_ordinary_process_is_not_essential() {
        let info = proc(3000, 100, "nginx");
        assert!(!is_essential(&info));
        assert_eq!(categorize(&info), EssentialCategory::Other);
    }
}
