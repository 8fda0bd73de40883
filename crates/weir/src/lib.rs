//! # Weir Sandboxing Engine
//!
//! Weir is the sandboxing engine of a "test && commit || revert" (TCR)
//! workflow enforcer. Before an edit is allowed to touch the real project
//! tree, Weir mounts a Linux OverlayFS union over it: the project is the
//! read-only lower layer, and all writes land in a disposable upper layer.
//! A passing test run merges the upper layer into the project ("commit");
//! a failing one throws it away ("discard") and the project is untouched.
//!
//! ## Usage
//!
//! ```no_run
//! use weir::overlay::{MountConfig, OverlayManager};
//!
//! # fn example() -> weir_common::WeirResult<()> {
//! let manager = OverlayManager::kernel();
//! let config = MountConfig::for_sandbox("/home/dev/project", "/var/lib/weir/sandboxes/s1");
//!
//! // Either a fully mounted overlay, or no filesystem residue at all.
//! let mount = manager.mount_with_cleanup(&config)?;
//!
//! // ... run the test suite against config.merged_dir ...
//! let tests_passed = true;
//!
//! if tests_passed {
//!     manager.mounter().commit(Some(&mount))?;
//! } else {
//!     manager.mounter().discard(Some(&mount))?;
//! }
//! manager.mounter().unmount(Some(&mount))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod overlay;

pub use overlay::{MountConfig, Mounter, OverlayManager, OverlayMount, StaleMount};
