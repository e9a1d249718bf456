//! The error type shared by every lifecycle operation.
//!
//! Operations return a single [`Error`] carrying a broad [`ErrorKind`]
//! plus a human readable message; the CLI prints the message and exits
//! non-zero. Internal helper failures are wrapped into one of these
//! kinds, never swallowed.

use std::fmt;

/// Broad classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A dataset, snapshot or bootloader plugin does not exist.
    NotFound,
    /// A dataset or property that must not exist already does.
    AlreadyExists,
    /// A composed dataset path or property name exceeds the limits
    /// enforced by the dataset store.
    NameTooLong,
    /// Allocation failure reported by a collaborator.
    NoMemory,
    /// The underlying dataset store reported failure on a primitive call.
    LibraryError,
    /// A dataset or pool handle could not be opened.
    OpenFailed,
    /// A mount or unmount step failed, or a dataset is mounted when it
    /// must not be.
    MountFailed,
    /// A directory needed for a mountpoint could not be created.
    MkdirFailed,
    /// A bootloader plugin callback failed.
    PluginError,
    /// The requested configuration is recognized but unsupported.
    NotImplemented,
    /// The system or property configuration is invalid for boot
    /// environments.
    InvalidConfig,
    /// Missing privileges for a file or dataset operation.
    PermissionDenied,
    /// Invariant violations and uncategorized failures.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NameTooLong => "name too long",
            ErrorKind::NoMemory => "out of memory",
            ErrorKind::LibraryError => "dataset store error",
            ErrorKind::OpenFailed => "open failed",
            ErrorKind::MountFailed => "mount failed",
            ErrorKind::MkdirFailed => "mkdir failed",
            ErrorKind::PluginError => "bootloader plugin error",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// The error returned from every public lifecycle entry point.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wrap a failure from a bootloader plugin callback.
    pub(crate) fn plugin(hook: &str, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::PluginError,
            format!("Bootloader plugin failed in {hook}: {err:#}"),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Construct an [`Error`] from a kind and a format string.
macro_rules! err {
    ($kind:ident, $($fmt:tt)*) => {
        $crate::errors::Error::new($crate::errors::ErrorKind::$kind, format!($($fmt)*))
    };
}
pub(crate) use err;
