//! Standard filesystem paths for Weir.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for Weir data.
pub static WEIR_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("WEIR_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/weir"))
});

/// Standard paths used by the Weir engine.
///
/// Every sandbox gets its own directory under `sandboxes/`, holding the
/// three ephemeral overlay directories. The root path contains the tool
/// name, which is what stale-mount detection keys on.
#[derive(Debug, Clone)]
pub struct WeirPaths {
    /// Root data directory (default: /var/lib/weir).
    pub root: PathBuf,
}

impl WeirPaths {
    /// Create paths with the default root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding all sandboxes.
    #[must_use]
    pub fn sandboxes(&self) -> PathBuf {
        self.root.join("sandboxes")
    }

    /// Directory for a specific sandbox.
    #[must_use]
    pub fn sandbox(&self, name: &str) -> PathBuf {
        self.sandboxes().join(name)
    }

    /// Writable overlay layer for a sandbox.
    #[must_use]
    pub fn sandbox_upper(&self, name: &str) -> PathBuf {
        self.sandbox(name).join("upper")
    }

    /// Kernel scratch directory for a sandbox.
    #[must_use]
    pub fn sandbox_work(&self, name: &str) -> PathBuf {
        self.sandbox(name).join("work")
    }

    /// Union mount point for a sandbox.
    #[must_use]
    pub fn sandbox_merged(&self, name: &str) -> PathBuf {
        self.sandbox(name).join("merged")
    }

    /// Create the root and sandboxes directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.sandboxes())?;
        Ok(())
    }
}

impl Default for WeirPaths {
    fn default() -> Self {
        Self {
            root: WEIR_ROOT.clone(),
        }
    }
}
