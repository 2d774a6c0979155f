//! Init system detection and coordination.
//!
//! Detects the active init system, then drives it toward a rescue or
//! single-user state by spawning its vendor tooling (`systemctl`,
//! `openrc`, `telinit`, ...). The coordinator is advisory: vendor
//! command failures are logged and the pipeline continues, because the
//! process terminator is the authoritative stopper.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use xenomorph_core::error::{Result, XenoError};

use crate::process::scan::parse_stat;

/// Poll interval while waiting for init quiescence.
const QUIESCENCE_POLL: Duration = Duration::from_millis(500);

/// The closed set of init systems we know how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    OpenRc,
    SysVInit,
    Upstart,
    Runit,
    S6,
    Unknown,
}

impl std::fmt::Display for InitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InitSystem::Systemd => "systemd",
            InitSystem::OpenRc => "openrc",
            InitSystem::SysVInit => "sysvinit",
            InitSystem::Upstart => "upstart",
            InitSystem::Runit => "runit",
            InitSystem::S6 => "s6",
            InitSystem::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Detection result.
#[derive(Debug, Clone)]
pub struct InitInfo {
    pub system: InitSystem,
    /// PID 1's comm
    pub pid1_comm: String,
    /// Version string, when the init system reports one
    pub version: Option<String>,
}

/// Detect the active init system. First match wins.
pub fn detect() -> InitInfo {
    let pid1_comm = read_pid1_comm().unwrap_or_default();

    let system = if Path::new("/run/systemd/system").exists() {
        InitSystem::Systemd
    } else if Path::new("/run/openrc").exists() || Path::new("/sbin/openrc-run").exists() {
        InitSystem::OpenRc
    } else if Path::new("/run/runit.stopit").exists() || Path::new("/var/run/runsvdir").exists() {
        InitSystem::Runit
    } else if Path::new("/run/s6").exists() || Path::new("/run/s6-rc").exists() {
        InitSystem::S6
    } else if Path::new("/var/run/upstart").exists() {
        InitSystem::Upstart
    } else if pid1_comm == "init" {
        InitSystem::SysVInit
    } else {
        InitSystem::Unknown
    };

    let version = match system {
        InitSystem::Systemd => systemd_version(),
        _ => None,
    };

    debug!(%system, pid1_comm = %pid1_comm, "detected init system");

    InitInfo {
        system,
        pid1_comm,
        version,
    }
}

fn read_pid1_comm() -> Option<String> {
    let stat = fs::read_to_string("/proc/1/stat").ok()?;
    parse_stat(&stat).map(|(comm, _, _)| comm)
}

fn systemd_version() -> Option<String> {
    let output = Command::new("systemctl").arg("--version").output().ok()?;
    parse_systemd_version(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the version from `systemctl --version` output, e.g.
/// `systemd 252 (252.22-1~deb12u1)` → `252`.
pub(crate) fn parse_systemd_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    let mut tokens = first.split_ascii_whitespace();
    if tokens.next()? != "systemd" {
        return None;
    }
    tokens.next().map(|v| v.to_string())
}

/// Whether we are inside a container, where init coordination is
/// pointless and the host's init must not be touched.
pub fn running_in_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    fs::read_to_string("/proc/1/cgroup")
        .map(|content| cgroup_indicates_container(&content))
        .unwrap_or(false)
}

pub(crate) fn cgroup_indicates_container(content: &str) -> bool {
    ["docker", "lxc", "kubepods", "containerd"]
        .iter()
        .any(|marker| content.contains(marker))
}

/// Init state transitions the coordinator can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Rescue,
    Emergency,
    MultiUser,
    PowerOff,
    Reboot,
}

impl Transition {
    /// systemd target name for `systemctl isolate`.
    pub(crate) fn systemd_target(self) -> &'static str {
        match self {
            Transition::Rescue => "rescue.target",
            Transition::Emergency => "emergency.target",
            Transition::MultiUser => "multi-user.target",
            Transition::PowerOff => "poweroff.target",
            Transition::Reboot => "reboot.target",
        }
    }

    /// OpenRC runlevel name.
    pub(crate) fn openrc_runlevel(self) -> &'static str {
        match self {
            Transition::Rescue | Transition::Emergency => "single",
            Transition::MultiUser => "default",
            Transition::PowerOff => "shutdown",
            Transition::Reboot => "reboot",
        }
    }

    /// sysvinit runlevel for `telinit`.
    pub(crate) fn telinit_level(self) -> &'static str {
        match self {
            Transition::Rescue | Transition::Emergency => "1",
            Transition::MultiUser => "3",
            Transition::PowerOff => "0",
            Transition::Reboot => "6",
        }
    }
}

/// Drives a detected init system toward quiescence.
pub struct Coordinator {
    info: InitInfo,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(info: InitInfo, timeout: Duration) -> Self {
        Self { info, timeout }
    }

    pub fn init_system(&self) -> InitSystem {
        self.info.system
    }

    /// Ask the init system to enter its rescue / single-user state.
    pub fn enter_rescue_mode(&self) -> Result<()> {
        self.transition(Transition::Rescue)
    }

    /// Request an init state transition.
    pub fn transition(&self, transition: Transition) -> Result<()> {
        info!(system = %self.info.system, ?transition, "requesting init transition");
        match self.info.system {
            InitSystem::Systemd => {
                run_vendor("systemctl", &["isolate", transition.systemd_target()])
            }
            InitSystem::OpenRc => run_vendor("openrc", &[transition.openrc_runlevel()]),
            InitSystem::SysVInit | InitSystem::Upstart => {
                run_vendor("telinit", &[transition.telinit_level()])
            }
            InitSystem::Runit | InitSystem::S6 | InitSystem::Unknown => {
                warn!(system = %self.info.system, "no transition support; skipping");
                Ok(())
            }
        }
    }

    /// Ask the init system to stop all supervised services.
    pub fn stop_all_services(&self) -> Result<()> {
        info!(system = %self.info.system, "stopping all services");
        match self.info.system {
            InitSystem::Systemd => run_vendor("systemctl", &["stop", "--all"]),
            InitSystem::OpenRc => run_vendor("rc-service", &["--all", "stop"]),
            InitSystem::SysVInit => run_vendor("killall5", &["-15"]),
            _ => {
                warn!(system = %self.info.system, "no mass-stop support; skipping");
                Ok(())
            }
        }
    }

    /// Count of pending init jobs; zero means quiescent. Only systemd
    /// reports jobs, everything else is treated as already quiescent.
    pub fn pending_jobs(&self) -> Result<usize> {
        match self.info.system {
            InitSystem::Systemd => {
                let output = capture_vendor("systemctl", &["list-jobs", "--no-legend"])?;
                Ok(output.lines().filter(|l| !l.trim().is_empty()).count())
            }
            _ => Ok(0),
        }
    }

    /// Poll until the init system reports zero pending jobs or the
    /// deadline expires.
    pub fn wait_for_quiescence(&self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let jobs = self.pending_jobs()?;
            if jobs == 0 {
                debug!(system = %self.info.system, "init system quiescent");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(XenoError::Timeout(format!(
                    "{} still has {jobs} pending jobs after {:?}",
                    self.info.system, self.timeout
                )));
            }
            debug!(jobs, "waiting for init quiescence");
            std::thread::sleep(QUIESCENCE_POLL);
        }
    }
}

/// Spawn a vendor command and inspect its exit code. A non-zero exit
/// is logged and tolerated; a spawn failure is an error the caller
/// downgrades.
fn run_vendor(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| XenoError::CommandFailed(format!("{program} {}: {e}", args.join(" "))))?;

    if !status.success() {
        warn!(
            command = %format!("{program} {}", args.join(" ")),
            code = status.code(),
            "vendor command reported failure"
        );
    }
    Ok(())
}

/// Spawn a vendor command and capture stdout.
fn capture_vendor(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| XenoError::CommandFailed(format!("{program} {}: {e}", args.join(" "))))?;

    if !output.status.success() {
        warn!(
            command = %format!("{program} {}", args.join(" ")),
            code = output.status.code(),
            "vendor command reported failure"
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgroup_container_markers() {
        assert!(cgroup_indicates_container(
            "0::/system.slice/docker-3f1f.scope\n"
        ));
        assert!(cgroup_indicates_container(
            "12:pids:/kubepods/besteffort/pod1234\n"
        ));
        assert!(cgroup_indicates_container("1:name=lxc/payload\n"));
        assert!(cgroup_indicates_container("0::/containerd/abc\n"));
        assert!(!cgroup_indicates_container("0::/init.scope\n"));
    }

    #[test]
    fn test_parse_systemd_version() {
        assert_eq!(
            parse_systemd_version("systemd 252 (252.22-1~deb12u1)\n+PAM +AUDIT\n"),
            Some("252".to_string())
        );
        assert_eq!(parse_systemd_version("something else"), None);
        assert_eq!(parse_systemd_version(""), None);
    }

    #[test]
    fn test_transition_systemd_targets() {
        assert_eq!(Transition::Rescue.systemd_target(), "rescue.target");
        assert_eq!(Transition::Emergency.systemd_target(), "emergency.target");
        assert_eq!(Transition::MultiUser.systemd_target(), "multi-user.target");
        assert_eq!(Transition::PowerOff.systemd_target(), "poweroff.target");
        assert_eq!(Transition::Reboot.systemd_target(), "reboot.target");
    }

    #[test]
    fn test_transition_openrc_runlevels() {
        assert_eq!(Transition::Rescue.openrc_runlevel(), "single");
        assert_eq!(Transition::MultiUser.openrc_runlevel(), "default");
        assert_eq!(Transition::PowerOff.openrc_runlevel(), "shutdown");
    }

    #[test]
    fn test_transition_telinit_levels() {
        assert_eq!(Transition::Rescue.telinit_level(), "1");
        assert_eq!(Transition::MultiUser.telinit_level(), "3");
        assert_eq!(Transition::PowerOff.telinit_level(), "0");
        assert_eq!(Transition::Reboot.telinit_level(), "6");
    }

    #[test]
    fn test_unknown_init_is_quiescent_and_noop() {
        let coordinator = Coordinator::new(
            InitInfo {
                system: InitSystem::Unknown,
                pid1_comm: "strange-init".to_string(),
                version: None,
            },
            Duration::from_secs(1),
        );

        assert_eq!(coordinator.pending_jobs().unwrap(), 0);
        coordinator.wait_for_quiescence().unwrap();
        coordinator.enter_rescue_mode().unwrap();
        coordinator.stop_all_services().unwrap();
    }

    #[test]
    fn test_detect_returns_some_system() {
        // Smoke test: detection must not panic regardless of host.
        let info = detect();
        let _ = info.system;
    }
}
