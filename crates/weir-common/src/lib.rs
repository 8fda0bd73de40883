//! # weir-common
//!
//! Shared utilities and types for the Weir sandboxing engine.
//!
//! This crate provides common functionality used across all Weir crates:
//! - Standard filesystem paths for sandbox directories
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{WeirError, WeirResult};
pub use paths::WeirPaths;
