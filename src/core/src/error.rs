use thiserror::Error;

/// Failure kind derived from errno after a raw syscall.
///
/// The set is closed: anything outside it is reported as `Unexpected`
/// with the raw errno value preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallErrorKind {
    PermissionDenied,
    InvalidArgument,
    OutOfMemory,
    DeviceBusy,
    NotADirectory,
    IsADirectory,
    NoSuchFileOrDirectory,
    NotEmpty,
    ReadOnlyFilesystem,
    TooManySymlinks,
    NameTooLong,
    NoSpace,
    Unexpected(i32),
}

impl SyscallErrorKind {
    /// Map a raw errno value to a failure kind.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EPERM | libc::EACCES => SyscallErrorKind::PermissionDenied,
            libc::EINVAL => SyscallErrorKind::InvalidArgument,
            libc::ENOMEM => SyscallErrorKind::OutOfMemory,
            libc::EBUSY => SyscallErrorKind::DeviceBusy,
            libc::ENOTDIR => SyscallErrorKind::NotADirectory,
            libc::EISDIR => SyscallErrorKind::IsADirectory,
            libc::ENOENT => SyscallErrorKind::NoSuchFileOrDirectory,
            libc::ENOTEMPTY => SyscallErrorKind::NotEmpty,
            libc::EROFS => SyscallErrorKind::ReadOnlyFilesystem,
            libc::ELOOP => SyscallErrorKind::TooManySymlinks,
            libc::ENAMETOOLONG => SyscallErrorKind::NameTooLong,
            libc::ENOSPC => SyscallErrorKind::NoSpace,
            other => SyscallErrorKind::Unexpected(other),
        }
    }
}

impl std::fmt::Display for SyscallErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyscallErrorKind::PermissionDenied => write!(f, "permission denied"),
            SyscallErrorKind::InvalidArgument => write!(f, "invalid argument"),
            SyscallErrorKind::OutOfMemory => write!(f, "out of memory"),
            SyscallErrorKind::DeviceBusy => write!(f, "device or resource busy"),
            SyscallErrorKind::NotADirectory => write!(f, "not a directory"),
            SyscallErrorKind::IsADirectory => write!(f, "is a directory"),
            SyscallErrorKind::NoSuchFileOrDirectory => write!(f, "no such file or directory"),
            SyscallErrorKind::NotEmpty => write!(f, "directory not empty"),
            SyscallErrorKind::ReadOnlyFilesystem => write!(f, "read-only filesystem"),
            SyscallErrorKind::TooManySymlinks => write!(f, "too many levels of symbolic links"),
            SyscallErrorKind::NameTooLong => write!(f, "name too long"),
            SyscallErrorKind::NoSpace => write!(f, "no space left on device"),
            SyscallErrorKind::Unexpected(errno) => write!(f, "unexpected errno {errno}"),
        }
    }
}

/// Xenomorph error types
#[derive(Error, Debug)]
pub enum XenoError {
    /// Invalid or missing user configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raw syscall failure with the operation and target preserved
    #[error("{op} failed on {target}: {kind}")]
    Syscall {
        op: &'static str,
        target: String,
        kind: SyscallErrorKind,
    },

    /// Path cannot be represented as a C string
    #[error("Path too long or not representable: {0}")]
    PathTooLong(String),

    /// Image reference or image source is malformed
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// OCI manifest could not be parsed
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    /// OCI image configuration could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Layer tar stream could not be extracted
    #[error("Layer extraction failed: {0}")]
    LayerExtraction(String),

    /// Blob or manifest download failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Layer media type names a compression we cannot decode
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Digest string is not of the form `algorithm:hash`
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Blob content does not match its declared digest
    #[error("Digest verification failed: {0}")]
    VerificationFailed(String),

    /// Operation is declared but not provided by this build
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// New root path does not exist or is not a directory
    #[error("New root not found: {0}")]
    NewRootNotFound(String),

    /// Old-root mount point could not be created under the new root
    #[error("Failed to create old root mount point: {0}")]
    OldRootCreationFailed(String),

    /// pivot_root(2) or the mount-move fallback failed
    #[error("pivot_root failed: {0}")]
    PivotRootFailed(String),

    #[error("chdir failed: {0}")]
    ChdirFailed(String),

    #[error("chroot failed: {0}")]
    ChrootFailed(String),

    /// exec returned, which only happens on failure
    #[error("exec failed: {0}")]
    ExecFailed(String),

    /// Pivot preparation aborted before any irreversible change
    #[error("Pivot preparation failed: {0}")]
    PreparationFailed(String),

    /// /proc is missing or unreadable
    #[error("/proc not available: {0}")]
    ProcNotAvailable(String),

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A vendor command could not be spawned or reported failure
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Init system refused or failed a runlevel transition
    #[error("Init transition failed: {0}")]
    TransitionFailed(String),

    /// Not enough memory to materialize the new root
    #[error("Insufficient memory: {required} bytes required, {available} available")]
    InsufficientMemory { required: u64, available: u64 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for XenoError {
    fn from(err: serde_json::Error) -> Self {
        XenoError::Serialization(err.to_string())
    }
}

/// Result type alias for xenomorph operations
pub type Result<T> = std::result::Result<T, XenoError>;
