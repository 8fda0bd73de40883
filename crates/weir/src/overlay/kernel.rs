//! Kernel-backed overlay mounting via `mount(2)`.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use walkdir::WalkDir;

use weir_common::{WeirError, WeirResult};

use super::config::{MountConfig, Mounter, OverlayMount};

/// How hard to try when detaching a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    /// Plain `umount(2)`.
    Normal,
    /// Lazy unmount (`MNT_DETACH`): detach now, tear down once no longer busy.
    Detach,
    /// Forced unmount (`MNT_FORCE`).
    Force,
}

/// Unmount attempts made when tearing down an active mount.
const UNMOUNT_ATTEMPTS: [UnmountMode; 2] = [UnmountMode::Normal, UnmountMode::Force];

/// Mounter backed by the kernel's OverlayFS.
///
/// The active-mounts map is an advisory diagnostics cache owned by this
/// instance; the kernel mount table is the source of truth, and stale-mount
/// recovery reconciles from it after a crash. The lock is held only across
/// map inserts and deletes, never across a syscall.
pub struct KernelMounter {
    active: RwLock<HashMap<PathBuf, OverlayMount>>,
}

impl KernelMounter {
    /// Create a kernel-based mounter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the mounts created by this instance, for diagnostics.
    #[must_use]
    pub fn active_mounts(&self) -> Vec<OverlayMount> {
        self.active.read().values().cloned().collect()
    }
}

impl Default for KernelMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Mounter for KernelMounter {
    fn mount(&self, config: &MountConfig) -> WeirResult<OverlayMount> {
        let meta = fs::metadata(&config.lower_dir).map_err(|err| WeirError::Config {
            message: format!(
                "lower directory not found: {} ({err})",
                config.lower_dir.display()
            ),
        })?;
        if !meta.is_dir() {
            return Err(WeirError::Config {
                message: format!(
                    "lower path must be a directory: {}",
                    config.lower_dir.display()
                ),
            });
        }

        create_dir_0700(&config.upper_dir).map_err(|source| WeirError::CreateDir {
            name: "upper",
            path: config.upper_dir.clone(),
            source,
        })?;
        if let Err(source) = create_dir_0700(&config.work_dir) {
            best_effort_remove(&config.upper_dir);
            return Err(WeirError::CreateDir {
                name: "work",
                path: config.work_dir.clone(),
                source,
            });
        }
        if let Err(source) = create_dir_0700(&config.merged_dir) {
            best_effort_remove(&config.work_dir);
            best_effort_remove(&config.upper_dir);
            return Err(WeirError::CreateDir {
                name: "merged",
                path: config.merged_dir.clone(),
                source,
            });
        }

        if let Err(err) = mount_overlay(config) {
            best_effort_remove(&config.merged_dir);
            best_effort_remove(&config.work_dir);
            best_effort_remove(&config.upper_dir);
            return Err(err);
        }

        let mount = OverlayMount::new(config.clone());
        self.active
            .write()
            .insert(config.merged_dir.clone(), mount.clone());
        Ok(mount)
    }

    fn unmount(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        let Some(mount) = mount else {
            return Ok(());
        };
        let merged = &mount.config.merged_dir;
        tracing::debug!(merged = %merged.display(), "Unmounting overlayfs");

        let mut detached = false;
        for mode in UNMOUNT_ATTEMPTS {
            match unmount_overlay(merged, mode) {
                Ok(()) => {
                    detached = true;
                    break;
                }
                Err(err) => {
                    tracing::debug!(merged = %merged.display(), ?mode, error = %err, "Unmount attempt failed");
                }
            }
        }
        if !detached {
            tracing::warn!(merged = %merged.display(), "Forced unmount failed, continuing cleanup");
        }

        best_effort_remove(merged);
        best_effort_remove(&mount.config.upper_dir);
        best_effort_remove(&mount.config.work_dir);

        self.active.write().remove(merged);
        Ok(())
    }

    fn commit(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        let mount = mount.ok_or(WeirError::MissingMount { op: "commit" })?;
        let upper = &mount.config.upper_dir;
        let lower = &mount.config.lower_dir;
        tracing::debug!(
            upper = %upper.display(),
            lower = %lower.display(),
            "Committing overlay changes"
        );

        for entry in WalkDir::new(upper).min_depth(1) {
            let entry = entry.map_err(|err| WeirError::Io(err.into()))?;
            let rel = entry
                .path()
                .strip_prefix(upper)
                .map_err(|err| WeirError::Io(std::io::Error::other(err)))?;
            let dst = lower.join(rel);
            let meta = entry.metadata().map_err(|err| WeirError::Io(err.into()))?;

            if is_whiteout(&meta) {
                // Deleted in the overlay; drop it from the real tree.
                remove_tree(&dst)?;
                continue;
            }
            if meta.is_dir() {
                fs::create_dir_all(&dst)?;
                fs::set_permissions(&dst, meta.permissions())?;
                continue;
            }
            // fs::copy truncates an existing destination and carries the
            // source's permission bits over.
            fs::copy(entry.path(), &dst)?;
        }

        tracing::info!(lower = %lower.display(), "Overlay changes committed");
        Ok(())
    }

    fn discard(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        let mount = mount.ok_or(WeirError::MissingMount { op: "discard" })?;
        tracing::debug!(
            upper = %mount.config.upper_dir.display(),
            "Discarding overlay changes"
        );
        remove_tree(&mount.config.upper_dir)?;
        Ok(())
    }
}

/// Mount the overlay onto `merged_dir`.
#[cfg(target_os = "linux")]
fn mount_overlay(config: &MountConfig) -> WeirResult<()> {
    use std::ffi::CString;

    use rustix::mount::{MountFlags, mount};

    let options = config.mount_options();
    tracing::debug!(
        merged = %config.merged_dir.display(),
        options = %options,
        "Mounting overlayfs"
    );

    let options_c = CString::new(options.as_str()).map_err(|_| WeirError::Config {
        message: "invalid overlay options (contains NUL byte)".to_string(),
    })?;

    mount(
        "overlay",                    // source
        config.merged_dir.as_path(),  // target
        c"overlay",                   // filesystem type
        MountFlags::empty(),          // flags
        options_c.as_c_str(),         // data/options
    )
    .map_err(|errno| mount_error(errno, config))?;

    tracing::info!(merged = %config.merged_dir.display(), "OverlayFS mounted");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn mount_overlay(_config: &MountConfig) -> WeirResult<()> {
    Err(WeirError::OverlayUnsupported {
        source: std::io::ErrorKind::Unsupported.into(),
    })
}

/// Categorize a mount errno into the user-facing error taxonomy.
#[cfg(target_os = "linux")]
fn mount_error(errno: rustix::io::Errno, config: &MountConfig) -> WeirError {
    if errno == rustix::io::Errno::PERM {
        WeirError::PermissionDenied {
            operation: "mount overlay".to_string(),
            source: errno.into(),
        }
    } else if errno == rustix::io::Errno::NODEV {
        WeirError::OverlayUnsupported {
            source: errno.into(),
        }
    } else {
        WeirError::MountFailed {
            merged_dir: config.merged_dir.clone(),
            source: errno.into(),
        }
    }
}

/// Detach a mount point with the given escalation mode.
#[cfg(target_os = "linux")]
pub(crate) fn unmount_overlay(target: &Path, mode: UnmountMode) -> std::io::Result<()> {
    use rustix::mount::{UnmountFlags, unmount};

    let flags = match mode {
        UnmountMode::Normal => UnmountFlags::empty(),
        UnmountMode::Detach => UnmountFlags::DETACH,
        UnmountMode::Force => UnmountFlags::FORCE,
    };
    unmount(target, flags)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn unmount_overlay(_target: &Path, _mode: UnmountMode) -> std::io::Result<()> {
    Err(std::io::ErrorKind::Unsupported.into())
}

/// OverlayFS records a deletion as a character device with device number 0.
fn is_whiteout(meta: &fs::Metadata) -> bool {
    meta.file_type().is_char_device() && meta.rdev() == 0
}

/// Create a directory (and its parents) with mode 0700.
pub(crate) fn create_dir_0700(path: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

/// Remove a path and anything beneath it; a missing path is fine.
pub(crate) fn remove_tree(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove a path, swallowing failures with a warning.
pub(crate) fn best_effort_remove(path: &Path) {
    if let Err(err) = remove_tree(path) {
        tracing::warn!(path = %path.display(), error = %err, "Cleanup failed");
    }
}
