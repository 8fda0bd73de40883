//! High-level orchestration of overlay mounts.

use std::path::Path;
use std::sync::Arc;

use weir_common::{WeirError, WeirPaths, WeirResult};

use super::config::{MountConfig, Mounter, OverlayMount};
use super::kernel::{KernelMounter, best_effort_remove, create_dir_0700};
use super::sim::SimMounter;
use super::stale::{self, StaleMount};

/// Orchestrates a mounter backend: validates configuration, manages the
/// ephemeral directories, and exposes an atomic mount-with-rollback
/// operation.
///
/// The backend is injected, so orchestration logic can run against
/// [`SimMounter`] in tests and [`KernelMounter`] in production.
pub struct OverlayManager {
    mounter: Arc<dyn Mounter>,
}

impl OverlayManager {
    /// Create a manager around the given backend.
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }

    /// Manager backed by real kernel mounts.
    #[must_use]
    pub fn kernel() -> Self {
        Self::new(Arc::new(KernelMounter::new()))
    }

    /// Manager backed by the in-memory simulated mounter.
    #[must_use]
    pub fn simulated() -> Self {
        Self::new(Arc::new(SimMounter::new()))
    }

    /// The backend this manager drives.
    #[must_use]
    pub fn mounter(&self) -> &dyn Mounter {
        self.mounter.as_ref()
    }

    /// Check a mount configuration before any filesystem work.
    ///
    /// All four paths must be non-empty and pairwise distinct, and the
    /// lower directory must exist. The other three are expected to not
    /// exist yet, so they are not checked.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending path.
    pub fn validate_mount_config(&self, config: &MountConfig) -> WeirResult<()> {
        let paths = [
            ("lowerdir", &config.lower_dir),
            ("upperdir", &config.upper_dir),
            ("workdir", &config.work_dir),
            ("mergeddir", &config.merged_dir),
        ];

        for (name, path) in &paths {
            if path.as_os_str().is_empty() {
                return Err(WeirError::Config {
                    message: format!("{name} required"),
                });
            }
        }
        for (i, (name_a, path_a)) in paths.iter().enumerate() {
            for (name_b, path_b) in &paths[i + 1..] {
                if path_a == path_b {
                    return Err(WeirError::Config {
                        message: format!(
                            "{name_a} and {name_b} must be distinct: {}",
                            path_a.display()
                        ),
                    });
                }
            }
        }

        if !config.lower_dir.exists() {
            return Err(WeirError::Config {
                message: format!(
                    "lower directory does not exist: {}",
                    config.lower_dir.display()
                ),
            });
        }

        Ok(())
    }

    /// Create the upper, work and merged directories, in that order.
    ///
    /// # Errors
    ///
    /// On failure at any step, every directory already created by this
    /// call is removed before the error (naming the failed directory) is
    /// returned.
    pub fn create_temp_dirs(&self, config: &MountConfig) -> WeirResult<()> {
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

        Ok(())
    }

    /// Remove the merged, upper and work directories, in that order.
    ///
    /// Best effort: removal failures are logged and swallowed, so cleanup
    /// never becomes a new failure source.
    pub fn cleanup_temp_dirs(&self, config: &MountConfig) {
        best_effort_remove(&config.merged_dir);
        best_effort_remove(&config.upper_dir);
        best_effort_remove(&config.work_dir);
    }

    /// Validate, create the ephemeral directories, and mount.
    ///
    /// This is the only entry point that guarantees either a fully mounted,
    /// fully-directoried overlay, or no filesystem residue at all: if the
    /// backend mount fails, the directories created here are removed before
    /// the backend's error is returned.
    ///
    /// # Errors
    ///
    /// Returns the validation, directory-creation or backend mount error.
    pub fn mount_with_cleanup(&self, config: &MountConfig) -> WeirResult<OverlayMount> {
        self.validate_mount_config(config)?;
        self.create_temp_dirs(config)?;

        match self.mounter.mount(config) {
            Ok(mount) => Ok(mount),
            Err(err) => {
                self.cleanup_temp_dirs(config);
                Err(err)
            }
        }
    }

    /// Mount a sandbox for a project tree under the standard Weir paths.
    ///
    /// Derives the ephemeral directories from `paths` and the sandbox name,
    /// then runs [`Self::mount_with_cleanup`].
    ///
    /// # Errors
    ///
    /// Returns an error if the standard directories cannot be created, or
    /// any error of [`Self::mount_with_cleanup`].
    pub fn mount_sandbox(
        &self,
        lower_dir: &Path,
        paths: &WeirPaths,
        name: &str,
    ) -> WeirResult<OverlayMount> {
        paths.create_dirs()?;
        let config = MountConfig::for_sandbox(lower_dir, paths.sandbox(name));
        self.mount_with_cleanup(&config)
    }

    /// The union mount point of a mount, if there is one.
    #[must_use]
    pub fn merged_path<'m>(&self, mount: Option<&'m OverlayMount>) -> Option<&'m Path> {
        mount.map(|m| m.config.merged_dir.as_path())
    }

    /// The upper directory of a mount, if there is one.
    #[must_use]
    pub fn upper_path<'m>(&self, mount: Option<&'m OverlayMount>) -> Option<&'m Path> {
        mount.map(|m| m.config.upper_dir.as_path())
    }

    /// The work directory of a mount, if there is one.
    #[must_use]
    pub fn work_path<'m>(&self, mount: Option<&'m OverlayMount>) -> Option<&'m Path> {
        mount.map(|m| m.config.work_dir.as_path())
    }

    /// The lower directory of a mount, if there is one.
    #[must_use]
    pub fn lower_path<'m>(&self, mount: Option<&'m OverlayMount>) -> Option<&'m Path> {
        mount.map(|m| m.config.lower_dir.as_path())
    }

    /// Human-readable description of a mount, for diagnostics.
    #[must_use]
    pub fn format_mount_info(&self, mount: Option<&OverlayMount>) -> String {
        let Some(mount) = mount else {
            return "No mount information".to_string();
        };
        format!(
            "Mount Info:\n  LowerDir: {}\n  UpperDir: {}\n  WorkDir: {}\n  MergedDir: {}\n  MountedAt: {}\n  PID: {}",
            mount.config.lower_dir.display(),
            mount.config.upper_dir.display(),
            mount.config.work_dir.display(),
            mount.config.merged_dir.display(),
            mount.mounted_at.to_rfc3339(),
            mount.pid
        )
    }

    /// Find orphaned Weir mounts in the live mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn detect_stale_mounts(&self) -> WeirResult<Vec<StaleMount>> {
        stale::detect_stale_mounts()
    }

    /// Detect and clean up all orphaned Weir mounts.
    #[must_use]
    pub fn cleanup_stale_mounts(&self) -> (usize, Option<WeirError>) {
        stale::cleanup_stale_mounts()
    }

    /// Number of orphaned Weir mounts currently in the live mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn stale_mount_count(&self) -> WeirResult<usize> {
        Ok(self.detect_stale_mounts()?.len())
    }
}
