//! Simulated mounter for deterministic, root-free testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use weir_common::{WeirError, WeirResult};

use super::config::{MountConfig, Mounter, OverlayMount};

/// Mounter that records mounts in memory instead of issuing syscalls.
///
/// Orchestration logic can run against this backend without root
/// privileges. The nil-handling and idempotence contracts mirror
/// [`super::KernelMounter`] exactly, so substituting backends never changes
/// observable error behavior.
pub struct SimMounter {
    mounts: RwLock<HashMap<PathBuf, OverlayMount>>,
}

impl SimMounter {
    /// Create a simulated mounter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a simulated mount is registered at the given merged dir.
    #[must_use]
    pub fn is_mounted(&self, merged_dir: &Path) -> bool {
        self.mounts.read().contains_key(merged_dir)
    }
}

impl Default for SimMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Mounter for SimMounter {
    fn mount(&self, config: &MountConfig) -> WeirResult<OverlayMount> {
        let mut mounts = self.mounts.write();
        if mounts.contains_key(&config.merged_dir) {
            return Err(WeirError::AlreadyMounted {
                path: config.merged_dir.clone(),
            });
        }

        let mount = OverlayMount::new(config.clone());
        mounts.insert(config.merged_dir.clone(), mount.clone());
        Ok(mount)
    }

    fn unmount(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        let Some(mount) = mount else {
            return Ok(());
        };
        self.mounts.write().remove(&mount.config.merged_dir);
        Ok(())
    }

    fn commit(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        mount
            .map(|_| ())
            .ok_or(WeirError::MissingMount { op: "commit" })
    }

    fn discard(&self, mount: Option<&OverlayMount>) -> WeirResult<()> {
        mount
            .map(|_| ())
            .ok_or(WeirError::MissingMount { op: "discard" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MountConfig {
        MountConfig::for_sandbox("/proj", "/tmp/weir/s1")
    }

    #[test]
    fn mount_registers_and_rejects_double_mount() {
        let sim = SimMounter::new();
        let mount = sim.mount(&config()).unwrap();
        assert!(sim.is_mounted(&mount.config.merged_dir));

        let err = sim.mount(&config()).unwrap_err();
        assert!(matches!(err, WeirError::AlreadyMounted { .. }));
        assert_eq!(err.to_string(), "Already mounted at /tmp/weir/s1/merged");
    }

    #[test]
    fn unmount_is_idempotent() {
        let sim = SimMounter::new();
        let mount = sim.mount(&config()).unwrap();

        sim.unmount(Some(&mount)).unwrap();
        assert!(!sim.is_mounted(&mount.config.merged_dir));
        sim.unmount(Some(&mount)).unwrap();
        sim.unmount(None).unwrap();
    }

    #[test]
    fn remount_after_unmount() {
        let sim = SimMounter::new();
        let mount = sim.mount(&config()).unwrap();
        sim.unmount(Some(&mount)).unwrap();
        sim.mount(&config()).unwrap();
    }

    #[test]
    fn commit_and_discard_require_mount() {
        let sim = SimMounter::new();
        let mount = sim.mount(&config()).unwrap();

        sim.commit(Some(&mount)).unwrap();
        sim.discard(Some(&mount)).unwrap();

        assert!(matches!(
            sim.commit(None),
            Err(WeirError::MissingMount { op: "commit" })
        ));
        assert!(matches!(
            sim.discard(None),
            Err(WeirError::MissingMount { op: "discard" })
        ));
    }

    #[test]
    fn mount_record_carries_pid_and_time() {
        let sim = SimMounter::new();
        let mount = sim.mount(&config()).unwrap();
        assert_eq!(mount.pid, std::process::id());
        assert!(mount.mounted_at <= chrono::Utc::now());
    }
}
