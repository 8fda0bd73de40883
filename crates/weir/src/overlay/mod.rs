//! OverlayFS sandboxing for TCR cycles.
//!
//! This module handles:
//! - Mount configuration and the [`Mounter`] contract
//! - Kernel-backed overlay mounts (with a simulated backend for tests)
//! - Atomic mount-with-rollback orchestration
//! - Recovery of mounts orphaned by a dead process

mod config;
mod kernel;
mod manager;
mod sim;
mod stale;

pub use config::{MOUNT_TAG, MountConfig, Mounter, OverlayMount};
pub use kernel::{KernelMounter, UnmountMode};
pub use manager::OverlayManager;
pub use sim::SimMounter;
pub use stale::{
    PROC_MOUNTS, StaleMount, cleanup_stale_mount, cleanup_stale_mounts, detect_stale_mounts,
    detect_stale_mounts_in, is_pid_running,
};
