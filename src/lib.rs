//! addonhost
//!
//! Runtime addon lifecycle management: discover, install, upgrade,
//! enable, disable, uninstall and package self-contained addon bundles
//! without restarting the host process.
//!
//! # Architecture
//!
//! - **Addons Module**: lifecycle orchestrator and its collaborators
//!   (descriptors, archives, hooks, assets, download, persistence)
//! - **Config Module**: host paths, server URL and static hook bindings
//! - **Logging Module**: file-based tracing setup
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use addonhost::addons::{AddonRegistry, AddonService, MemoryStore};
//! use addonhost::config::HostConfig;
//!
//! let config = Arc::new(HostConfig::default());
//! let registry = Arc::new(AddonRegistry::new());
//! let service = AddonService::new(config, registry, Arc::new(MemoryStore::new()));
//! let installed = service.list().expect("addon scan failed");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod addons;
pub mod config;
pub mod logging;

// Re-export main types
pub use addons::{Addon, AddonError, AddonRegistry, AddonService};
pub use config::HostConfig;
