//! Mount configuration, live-mount records and the mounter contract.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weir_common::WeirResult;

/// Identifying tag for overlay mounts created by this tool.
///
/// Stale-mount detection only considers overlay mounts whose mount point or
/// option string contains this tag, so sandbox directories must live under a
/// path that carries it (the default [`weir_common::WeirPaths`] root does).
pub const MOUNT_TAG: &str = "weir";

/// The four directories an overlay mount is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Read-only base directory (the real project tree). Never mutated by
    /// the mount itself; only a commit writes here.
    pub lower_dir: PathBuf,
    /// Writable overlay layer. All changes land here first. Created by the
    /// engine, owned exclusively by one active mount.
    pub upper_dir: PathBuf,
    /// Kernel-private scratch space. Must be on the same filesystem as
    /// `upper_dir`; opaque to callers.
    pub work_dir: PathBuf,
    /// Union mount point where lower + upper appear as one tree. This is
    /// the path tests run against.
    pub merged_dir: PathBuf,
}

impl MountConfig {
    /// Create a configuration from four explicit paths.
    pub fn new(
        lower_dir: impl Into<PathBuf>,
        upper_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        merged_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lower_dir: lower_dir.into(),
            upper_dir: upper_dir.into(),
            work_dir: work_dir.into(),
            merged_dir: merged_dir.into(),
        }
    }

    /// Derive the three ephemeral directories under a sandbox directory.
    pub fn for_sandbox(lower_dir: impl Into<PathBuf>, sandbox_dir: impl AsRef<Path>) -> Self {
        let sandbox_dir = sandbox_dir.as_ref();
        Self {
            lower_dir: lower_dir.into(),
            upper_dir: sandbox_dir.join("upper"),
            work_dir: sandbox_dir.join("work"),
            merged_dir: sandbox_dir.join("merged"),
        }
    }

    /// Render the OverlayFS mount options string.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// An active overlay mount.
///
/// Created only as the return value of a successful [`Mounter::mount`] and
/// held exclusively by the caller until handed back to unmount, commit or
/// discard. The record never crosses a process boundary; another process
/// learns of the mount only by re-parsing the live mount table (see
/// [`super::stale`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayMount {
    /// The configuration this mount was created from.
    pub config: MountConfig,
    /// When the overlay was mounted.
    pub mounted_at: DateTime<Utc>,
    /// Process that mounted this overlay.
    pub pid: u32,
}

impl OverlayMount {
    pub(crate) fn new(config: MountConfig) -> Self {
        Self {
            config,
            mounted_at: Utc::now(),
            pid: std::process::id(),
        }
    }
}

/// The four-operation overlay contract.
///
/// Implemented by [`super::KernelMounter`] (real syscalls) and
/// [`super::SimMounter`] (in-memory, root-free). Callers depend only on this
/// trait, and substituting backends never changes observable error behavior
/// for the nil-mount and idempotence edge cases.
pub trait Mounter: Send + Sync {
    /// Create and mount an overlay filesystem.
    ///
    /// # Errors
    ///
    /// Fails if the lower directory is missing or not a directory, if an
    /// ephemeral directory cannot be created, or if the mount itself is
    /// refused. No partial artifacts survive a failed mount.
    fn mount(&self, config: &MountConfig) -> WeirResult<OverlayMount>;

    /// Remove the mount and clean up its ephemeral directories.
    ///
    /// Safe to call multiple times and with `None`; never returns a hard
    /// error, because the caller's priority is reclaiming disk.
    ///
    /// # Errors
    ///
    /// None in practice; the signature matches the rest of the contract.
    fn unmount(&self, mount: Option<&OverlayMount>) -> WeirResult<()>;

    /// Merge changes from the upper layer into the lower layer.
    ///
    /// # Errors
    ///
    /// Fails on a `None` mount or on the first I/O error of the merge walk.
    /// A failed commit may leave the lower layer partially updated;
    /// re-running it is safe (the merge is order-independent per relative
    /// path) and is the prescribed recovery.
    fn commit(&self, mount: Option<&OverlayMount>) -> WeirResult<()>;

    /// Remove the upper layer without merging. All changes are lost.
    ///
    /// # Errors
    ///
    /// Fails on a `None` mount or if the upper layer cannot be removed.
    fn discard(&self, mount: Option<&OverlayMount>) -> WeirResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_mount_options() {
        let config = MountConfig::new("/proj", "/tmp/weir/u", "/tmp/weir/w", "/tmp/weir/m");
        assert_eq!(
            config.mount_options(),
            "lowerdir=/proj,upperdir=/tmp/weir/u,workdir=/tmp/weir/w"
        );
    }

    #[test]
    fn for_sandbox_derives_ephemeral_dirs() {
        let config = MountConfig::for_sandbox("/proj", "/var/lib/weir/sandboxes/s1");
        assert_eq!(config.lower_dir, PathBuf::from("/proj"));
        assert_eq!(
            config.upper_dir,
            PathBuf::from("/var/lib/weir/sandboxes/s1/upper")
        );
        assert_eq!(
            config.work_dir,
            PathBuf::from("/var/lib/weir/sandboxes/s1/work")
        );
        assert_eq!(
            config.merged_dir,
            PathBuf::from("/var/lib/weir/sandboxes/s1/merged")
        );
    }

    #[test]
    fn mount_record_round_trips_through_json() {
        let mount = OverlayMount::new(MountConfig::for_sandbox("/proj", "/tmp/weir/s1"));
        let json = serde_json::to_string(&mount).unwrap();
        let back: OverlayMount = serde_json::from_str(&json).unwrap();
        assert_eq!(back.config, mount.config);
        assert_eq!(back.pid, mount.pid);
    }
}
