//! Addon lifecycle system.
//!
//! Discovers, installs, upgrades, enables, disables, uninstalls and
//! packages self-contained addon bundles without restarting the host.
//! The lifecycle orchestrator lives in [`service`]; the remaining modules
//! are its collaborators: descriptor metadata, zip archives, hook
//! registry, published assets, remote download, persistence and seed data.

pub mod archive;
pub mod assets;
pub mod descriptor;
pub mod fetcher;
pub mod hooks;
pub mod seed;
pub mod service;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use thiserror::Error;

pub use archive::{ArchiveBundle, ArchiveEngine};
pub use assets::AssetLinker;
pub use descriptor::{AddonDescriptor, AddonState, MetadataStore};
pub use fetcher::{ArchiveSource, LocalArchiveSource, RemoteFetcher};
pub use hooks::{ADDON_INIT_HOOK, HookBinding, HookRegistry, HookTable};
pub use service::AddonService;
pub use store::{MemoryStore, StoreError, TransactionalStore};

/// Capabilities every addon carries by contract. Names declared by
/// [`Addon::hooks`] that collide with this set are never treated as
/// dispatchable hooks.
pub const BASE_CAPABILITIES: &[&str] = &["Install", "Uninstall", "Enable", "Disable", "Upgrade"];

/// Addon error types.
#[derive(Debug, Error)]
pub enum AddonError {
    /// Target addon directory already exists.
    #[error("addon '{0}' already exists")]
    AlreadyExists(String),

    /// Addon directory absent.
    #[error("addon '{0}' not found")]
    NotFound(String),

    /// Missing or malformed descriptor, or a disallowed addon name.
    #[error("invalid addon package: {0}")]
    InvalidPackage(String),

    /// Archive could not be opened.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// Extraction failed part-way; the destination has been cleaned up.
    #[error("extract failed: {0}")]
    ExtractError(String),

    /// Transport failure talking to the remote addon server.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Well-formed error payload returned by the remote addon server.
    #[error("remote rejected request: {msg} (code {code})")]
    RemoteRejected {
        code: i64,
        msg: String,
        data: serde_json::Value,
    },

    /// Filesystem write or permission failure.
    #[error("write failed: {0}")]
    WriteError(String),

    /// Collaborator hook threw during install (or enable).
    #[error("install of '{addon}' failed: {message}")]
    InstallFailed { addon: String, message: String },

    /// Collaborator hook threw during uninstall (or disable).
    #[error("uninstall of '{addon}' failed: {message}")]
    UninstallFailed { addon: String, message: String },

    /// Failure anywhere in the upgrade pipeline after download.
    #[error("upgrade of '{addon}' failed: {message}")]
    UpgradeFailed { addon: String, message: String },

    /// Catch-all for unexpected formats.
    #[error("{0}")]
    Unknown(String),
}

/// The contract every installable addon implements.
///
/// Hook handling is registration-by-interface: an addon enumerates the
/// hook names it answers via [`Addon::hooks`] and receives dispatches
/// through [`Addon::handle_hook`]. There is no runtime reflection.
pub trait Addon: Send + Sync {
    /// Unique addon slug (alphanumeric).
    fn name(&self) -> &str;

    /// Runs once when the addon is installed. Mandatory.
    fn install(&self) -> Result<(), AddonError>;

    /// Runs once when the addon is uninstalled. Mandatory.
    fn uninstall(&self) -> Result<(), AddonError>;

    /// Runs when the addon is enabled. Optional.
    fn enable(&self) -> Result<(), AddonError> {
        Ok(())
    }

    /// Runs when the addon is disabled. Optional.
    fn disable(&self) -> Result<(), AddonError> {
        Ok(())
    }

    /// Versioned upgrade entry point, called after the new files are in
    /// place. `from_version` is the descriptor version that was installed
    /// before the upgrade. Optional.
    fn upgrade(&self, _from_version: &str) -> Result<(), AddonError> {
        Ok(())
    }

    /// Hook names this addon answers. Names in [`BASE_CAPABILITIES`] are
    /// ignored by the registry.
    fn hooks(&self) -> Vec<String> {
        Vec::new()
    }

    /// Handles one hook dispatch. `Ok(None)` means "nothing to contribute".
    fn handle_hook(
        &self,
        _hook: &str,
        _params: &serde_json::Value,
    ) -> Result<Option<String>, AddonError> {
        Ok(None)
    }

    /// Code-declared descriptor fields. These win over `info.ini` fields
    /// for keys present in both; code is the source of truth for
    /// structural fields.
    fn info_defaults(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Process-wide registry of addon code handles, keyed by addon name.
///
/// The host registers an [`Addon`] implementation for each addon whose
/// code it has linked in; lifecycle operations consult this registry for
/// collaborator calls and treat a missing optional handle as a no-op.
#[derive(Default)]
pub struct AddonRegistry {
    handles: RwLock<HashMap<String, Arc<dyn Addon>>>,
}

impl AddonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an addon handle under its own name.
    pub fn register(&self, addon: Arc<dyn Addon>) {
        let name = addon.name().to_string();
        if let Ok(mut handles) = self.handles.write() {
            handles.insert(name, addon);
        }
    }

    /// Removes a handle. Returns true if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.handles
            .write()
            .map(|mut h| h.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Looks up a handle by addon name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.handles.read().ok()?.get(name).cloned()
    }

    /// Returns all registered addon names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.handles
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Cache scope carried on invalidation broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Descriptor and addon-config caches.
    Descriptors,
    /// The hook table.
    Hooks,
}

/// Propagates cache invalidations to sibling processes.
///
/// The in-process caches are invalidated directly; implementations of
/// this trait forward the invalidation through a shared cache layer so
/// replicas behind a load balancer do not serve stale hook tables.
pub trait CacheSync: Send + Sync {
    /// Publishes an invalidation. `name` is `None` for a full flush.
    fn publish(&self, scope: CacheScope, name: Option<&str>);
}

/// Single-process deployment: nothing to propagate.
#[derive(Debug, Default)]
pub struct NoopCacheSync;

impl CacheSync for NoopCacheSync {
    fn publish(&self, _scope: CacheScope, _name: Option<&str>) {}
}

/// Returns true if `name` is a valid addon slug (`[A-Za-z0-9]+`).
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl Addon for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }
        fn install(&self) -> Result<(), AddonError> {
            Ok(())
        }
        fn uninstall(&self) -> Result<(), AddonError> {
            Ok(())
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("shop"));
        assert!(is_valid_name("Shop2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("my-addon"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("../etc"));
    }

    #[test]
    fn test_registry_register_get() {
        let registry = AddonRegistry::new();
        assert!(registry.get("dummy").is_none());

        registry.register(Arc::new(Dummy));
        assert!(registry.get("dummy").is_some());
        assert_eq!(registry.names(), vec!["dummy".to_string()]);

        assert!(registry.unregister("dummy"));
        assert!(!registry.unregister("dummy"));
        assert!(registry.get("dummy").is_none());
    }

    #[test]
    fn test_optional_methods_default_to_noop() {
        let dummy = Dummy;
        assert!(dummy.enable().is_ok());
        assert!(dummy.disable().is_ok());
        assert!(dummy.upgrade("1.0.0").is_ok());
        assert!(dummy.hooks().is_empty());
        assert!(
            dummy
                .handle_hook("Anything", &serde_json::Value::Null)
                .is_ok_and(|r| r.is_none())
        );
    }
}
