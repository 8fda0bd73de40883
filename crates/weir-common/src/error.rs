//! Common error types for the Weir ecosystem.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WeirError`].
pub type WeirResult<T> = Result<T, WeirError>;

/// Common errors across the Weir ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum WeirError {
    /// Invalid mount configuration, detected before any syscall.
    #[error("Invalid mount configuration: {message}")]
    #[diagnostic(code(weir::overlay::config))]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// The kernel refused the mount with EPERM.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(weir::overlay::permission_denied),
        help("Overlay mounts require elevated privileges, try running with sudo")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
        /// The underlying syscall error.
        #[source]
        source: std::io::Error,
    },

    /// The kernel refused the mount with ENODEV.
    #[error("OverlayFS is not supported by the running kernel")]
    #[diagnostic(
        code(weir::overlay::no_device),
        help("A kernel built with CONFIG_OVERLAY_FS is required, a kernel update may be needed")
    )]
    OverlayUnsupported {
        /// The underlying syscall error.
        #[source]
        source: std::io::Error,
    },

    /// The mount syscall failed for a reason other than EPERM/ENODEV.
    #[error("Failed to mount overlay on {}", .merged_dir.display())]
    #[diagnostic(code(weir::overlay::mount_failed))]
    MountFailed {
        /// The intended mount point.
        merged_dir: PathBuf,
        /// The underlying syscall error.
        #[source]
        source: std::io::Error,
    },

    /// One of the ephemeral overlay directories could not be created.
    #[error("Failed to create {name} directory {}", .path.display())]
    #[diagnostic(code(weir::overlay::create_dir))]
    CreateDir {
        /// Which directory failed ("upper", "work" or "merged").
        name: &'static str,
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Commit or discard was invoked without an active mount record.
    #[error("Cannot {op} without an active mount")]
    #[diagnostic(code(weir::overlay::missing_mount))]
    MissingMount {
        /// The operation that was attempted.
        op: &'static str,
    },

    /// A second mount was attempted onto an occupied mount point.
    #[error("Already mounted at {}", .path.display())]
    #[diagnostic(
        code(weir::overlay::already_mounted),
        help("Unmount the existing overlay first")
    )]
    AlreadyMounted {
        /// The occupied mount point.
        path: PathBuf,
    },

    /// Every unmount attempt in the escalation ladder failed.
    #[error("Failed to unmount {}", .path.display())]
    #[diagnostic(code(weir::overlay::unmount_failed))]
    UnmountFailed {
        /// The mount point that could not be unmounted.
        path: PathBuf,
        /// The error from the last attempt.
        #[source]
        source: std::io::Error,
    },

    /// The live mount table could not be opened or read.
    #[error("Failed to read mount table {}", .path.display())]
    #[diagnostic(code(weir::overlay::mount_table))]
    MountTable {
        /// The mount table file.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(weir::serialization))]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(weir::io))]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WeirError {
    fn from(err: serde_json::Error) -> Self {
        WeirError::Serialization(err.to_string())
    }
}
