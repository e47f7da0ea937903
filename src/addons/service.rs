//! Lifecycle orchestrator.
//!
//! [`AddonService`] ties the collaborators together and drives the
//! operations the host exposes: install, uninstall, enable, disable,
//! upgrade, backup, build, create and list. Each operation leaves the
//! addon directory either fully transitioned or cleaned up; partial
//! installs never survive.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::archive::ArchiveEngine;
use super::assets::AssetLinker;
use super::descriptor::{AddonDescriptor, AddonState, MetadataStore};
use super::fetcher::{ArchiveSource, RemoteFetcher};
use super::hooks::HookRegistry;
use super::seed::import_seed;
use super::store::TransactionalStore;
use super::{is_valid_name, AddonError, AddonRegistry, CacheSync, NoopCacheSync};
use crate::config::HostConfig;

/// Drives the addon lifecycle end to end.
pub struct AddonService {
    config: Arc<HostConfig>,
    registry: Arc<AddonRegistry>,
    metadata: Arc<MetadataStore>,
    hooks: Arc<HookRegistry>,
    assets: AssetLinker,
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn TransactionalStore>,
}

impl AddonService {
    /// Creates a service downloading archives from the configured
    /// distribution server.
    #[must_use]
    pub fn new(
        config: Arc<HostConfig>,
        registry: Arc<AddonRegistry>,
        store: Arc<dyn TransactionalStore>,
    ) -> Self {
        let source = Arc::new(RemoteFetcher::new(Arc::clone(&config)));
        Self::with_source(config, registry, store, source, Arc::new(NoopCacheSync))
    }

    /// Creates a service with an explicit archive source and cache
    /// synchronizer. This is the constructor tests and multi-replica
    /// deployments use.
    #[must_use]
    pub fn with_source(
        config: Arc<HostConfig>,
        registry: Arc<AddonRegistry>,
        store: Arc<dyn TransactionalStore>,
        source: Arc<dyn ArchiveSource>,
        cache_sync: Arc<dyn CacheSync>,
    ) -> Self {
        let metadata = Arc::new(MetadataStore::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&cache_sync),
        ));
        let hooks = Arc::new(HookRegistry::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&cache_sync),
        ));
        let assets = AssetLinker::new(Arc::clone(&config));

        Self {
            config,
            registry,
            metadata,
            hooks,
            assets,
            source,
            store,
        }
    }

    /// Descriptor and config access.
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Hook table and dispatch.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Downloads and installs an addon, leaving it enabled.
    ///
    /// With `force` set an existing installation is overwritten.
    /// `extend` is passed through to the archive source (version pins).
    pub fn install(
        &self,
        name: &str,
        force: bool,
        extend: &BTreeMap<String, String>,
    ) -> Result<(), AddonError> {
        if !is_valid_name(name) {
            return Err(AddonError::InvalidPackage(format!(
                "'{name}' is not a valid addon name"
            )));
        }
        self.guard_existing(name, force)?;

        let archive = self.source.fetch(name, extend)?;
        self.check_archive_name(&archive, name)?;
        self.install_pipeline(name, &archive)
    }

    /// Installs an addon from a local archive file, leaving it enabled.
    ///
    /// The addon name is taken from the descriptor inside the archive.
    pub fn install_from_archive(&self, archive: &Path, force: bool) -> Result<String, AddonError> {
        let text = ArchiveEngine::read_entry_text(archive, "info.ini")?;
        let descriptor = AddonDescriptor::parse(&text)?;
        let name = descriptor
            .get_str("name")
            .ok_or_else(|| AddonError::InvalidPackage("archive descriptor has no name".into()))?;
        if !is_valid_name(&name) {
            return Err(AddonError::InvalidPackage(format!(
                "'{name}' is not a valid addon name"
            )));
        }

        self.guard_existing(&name, force)?;
        self.install_pipeline(&name, archive)?;
        Ok(name)
    }

    fn guard_existing(&self, name: &str, force: bool) -> Result<(), AddonError> {
        let dir = self.config.addon_dir(name);
        if dir.exists() {
            if !force {
                return Err(AddonError::AlreadyExists(name.to_string()));
            }
            fs::remove_dir_all(&dir)
                .map_err(|e| AddonError::WriteError(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    /// The archive descriptor must name the addon it was requested for.
    fn check_archive_name(&self, archive: &Path, name: &str) -> Result<(), AddonError> {
        let text = ArchiveEngine::read_entry_text(archive, "info.ini")?;
        let descriptor = AddonDescriptor::parse(&text)?;
        match descriptor.get_str("name") {
            Some(found) if found == name => Ok(()),
            Some(found) => Err(AddonError::InvalidPackage(format!(
                "archive is for '{found}', expected '{name}'"
            ))),
            None => Err(AddonError::InvalidPackage(
                "archive descriptor has no name".into(),
            )),
        }
    }

    /// Extract, validate, persist installed-but-disabled state with the
    /// collaborator install hook in one transaction, import seed data,
    /// then enable. Any failure before enable removes the directory.
    fn install_pipeline(&self, name: &str, archive: &Path) -> Result<(), AddonError> {
        let dir = self.config.addon_dir(name);
        ArchiveEngine::extract(archive, &dir)?;
        self.metadata.invalidate(name);

        let descriptor = match self.metadata.get_info(name) {
            Ok(Some(d)) if d.check_info() => d,
            Ok(_) => {
                let _ = fs::remove_dir_all(&dir);
                return Err(AddonError::InvalidPackage(format!(
                    "addon '{name}' descriptor incomplete"
                )));
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        if let Err(e) = self.run_install_transaction(name, &descriptor) {
            let _ = fs::remove_dir_all(&dir);
            self.metadata.invalidate(name);
            return Err(e);
        }

        import_seed(
            &dir.join("install.sql"),
            self.store.as_ref(),
            &self.config.table_prefix,
        )?;

        self.enable(name)?;
        info!("installed addon '{}'", name);
        Ok(())
    }

    fn run_install_transaction(
        &self,
        name: &str,
        descriptor: &AddonDescriptor,
    ) -> Result<(), AddonError> {
        let fail = |message: String| AddonError::InstallFailed {
            addon: name.to_string(),
            message,
        };

        self.store.begin().map_err(|e| fail(e.to_string()))?;

        let result = (|| {
            let mut persisted = descriptor.clone();
            persisted.set_state(AddonState::Disabled);
            persisted.remove("url");
            self.metadata.put_info(name, &persisted)?;

            if let Some(handle) = self.registry.get(name) {
                handle.install().map_err(|e| fail(e.to_string()))?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => self.store.commit().map_err(|e| fail(e.to_string())),
            Err(e) => {
                if let Err(rb) = self.store.rollback() {
                    warn!("rollback after failed install of '{}': {}", name, rb);
                }
                Err(e)
            }
        }
    }

    /// Removes an addon entirely: published assets, collaborator
    /// uninstall hook, then the directory.
    ///
    /// A failed uninstall hook leaves the directory in place so the
    /// operation is retryable; with `force` set the failure is logged
    /// and removal proceeds anyway.
    pub fn uninstall(&self, name: &str, force: bool) -> Result<(), AddonError> {
        let dir = self.config.addon_dir(name);
        if !dir.is_dir() {
            return Err(AddonError::NotFound(name.to_string()));
        }

        if let Err(e) = self.assets.remove(name) {
            warn!("could not remove published assets for '{}': {}", name, e);
        }

        if let Some(handle) = self.registry.get(name) {
            if let Err(e) = handle.uninstall() {
                if !force {
                    return Err(AddonError::UninstallFailed {
                        addon: name.to_string(),
                        message: e.to_string(),
                    });
                }
                warn!("forced removal of '{}' despite failed uninstall hook: {}", name, e);
            }
        }

        fs::remove_dir_all(&dir)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", dir.display(), e)))?;
        self.metadata.invalidate(name);
        self.hooks.refresh();
        info!("uninstalled addon '{}'", name);
        Ok(())
    }

    /// Enables an addon: publishes its assets, runs the optional enable
    /// hook and flips the persisted state.
    pub fn enable(&self, name: &str) -> Result<(), AddonError> {
        let mut descriptor = self
            .metadata
            .get_info(name)?
            .ok_or_else(|| AddonError::NotFound(name.to_string()))?;

        self.assets.publish(name)?;

        if let Some(handle) = self.registry.get(name) {
            handle.enable().map_err(|e| AddonError::InstallFailed {
                addon: name.to_string(),
                message: e.to_string(),
            })?;
        }

        descriptor.set_state(AddonState::Enabled);
        descriptor.remove("url");
        self.metadata.put_info(name, &descriptor)?;
        self.hooks.refresh();
        info!("enabled addon '{}'", name);
        Ok(())
    }

    /// Disables an addon: removes its published assets, flips the
    /// persisted state and runs the optional disable hook.
    pub fn disable(&self, name: &str) -> Result<(), AddonError> {
        let mut descriptor = self
            .metadata
            .get_info(name)?
            .ok_or_else(|| AddonError::NotFound(name.to_string()))?;

        if let Err(e) = self.assets.remove(name) {
            warn!("could not remove published assets for '{}': {}", name, e);
        }

        descriptor.set_state(AddonState::Disabled);
        descriptor.remove("url");
        self.metadata.put_info(name, &descriptor)?;

        if let Some(handle) = self.registry.get(name) {
            handle.disable().map_err(|e| AddonError::UninstallFailed {
                addon: name.to_string(),
                message: e.to_string(),
            })?;
        }

        self.hooks.refresh();
        info!("disabled addon '{}'", name);
        Ok(())
    }

    /// Upgrades an installed addon in place.
    ///
    /// The current directory is archived to a timestamped backup first.
    /// Config values survive the re-extraction. Any failure after the
    /// old files are gone restores the backup before returning.
    pub fn upgrade(
        &self,
        name: &str,
        extend: &BTreeMap<String, String>,
    ) -> Result<(), AddonError> {
        let current = self
            .metadata
            .get_info(name)?
            .ok_or_else(|| AddonError::NotFound(name.to_string()))?;
        let from_version = current.get_str("version").unwrap_or_default();
        let saved_config = self.metadata.get_config(name)?;

        let archive = self.source.fetch(name, extend)?;
        self.check_archive_name(&archive, name)?;
        let backup = self.backup(name)?;

        let dir = self.config.addon_dir(name);
        let result: Result<(), AddonError> = (|| {
            fs::remove_dir_all(&dir)
                .map_err(|e| AddonError::WriteError(format!("{}: {}", dir.display(), e)))?;
            ArchiveEngine::extract(&archive, &dir)?;
            self.metadata.invalidate(name);

            if !saved_config.is_empty() {
                self.metadata.set_config(name, &saved_config)?;
            }

            import_seed(
                &dir.join("install.sql"),
                self.store.as_ref(),
                &self.config.table_prefix,
            )?;

            if let Some(handle) = self.registry.get(name) {
                handle.upgrade(&from_version)?;
            }

            if let Some(version) = extend.get("version") {
                let mut patch = AddonDescriptor::default();
                patch.set_str("version", version);
                self.metadata.set_info(name, &patch)?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            warn!("upgrade of '{}' failed, restoring backup: {}", name, e);
            let _ = fs::remove_dir_all(&dir);
            ArchiveEngine::extract(&backup, &dir)?;
            self.metadata.invalidate(name);
            return Err(AddonError::UpgradeFailed {
                addon: name.to_string(),
                message: e.to_string(),
            });
        }

        self.metadata.invalidate(name);
        self.hooks.refresh();
        info!("upgraded addon '{}' from version {}", name, from_version);
        Ok(())
    }

    /// Archives the current addon directory into the backup area.
    /// Returns the path of the created archive.
    pub fn backup(&self, name: &str) -> Result<PathBuf, AddonError> {
        let dir = self.config.addon_dir(name);
        if !dir.is_dir() {
            return Err(AddonError::NotFound(name.to_string()));
        }

        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let dest = self
            .config
            .backup_dir()
            .map_err(|e| AddonError::WriteError(e.to_string()))?
            .join(format!("{name}-backup-{stamp}.zip"));
        ArchiveEngine::create(&dir, &dest)?;
        info!("backed up addon '{}' to {}", name, dest.display());
        Ok(dest)
    }

    /// Packages an installed addon into a distributable archive next to
    /// the addon directories. Returns the archive path.
    pub fn build(&self, name: &str) -> Result<PathBuf, AddonError> {
        let dir = self.config.addon_dir(name);
        if !dir.is_dir() {
            return Err(AddonError::NotFound(name.to_string()));
        }

        let dest = self
            .config
            .addons_path()
            .map_err(|e| AddonError::WriteError(e.to_string()))?
            .join(format!("{name}.zip"));
        ArchiveEngine::create(&dir, &dest)?;
        Ok(dest)
    }

    /// Scaffolds a new addon directory with stub descriptor, config and
    /// asset folder. Returns the created directory.
    pub fn create(&self, name: &str) -> Result<PathBuf, AddonError> {
        if !is_valid_name(name) {
            return Err(AddonError::InvalidPackage(format!(
                "'{name}' is not a valid addon name"
            )));
        }
        let dir = self.config.addon_dir(name);
        if dir.exists() {
            return Err(AddonError::AlreadyExists(name.to_string()));
        }

        let write = |path: &Path, contents: &str| {
            fs::write(path, contents)
                .map_err(|e| AddonError::WriteError(format!("{}: {}", path.display(), e)))
        };

        fs::create_dir_all(dir.join("assets"))
            .map_err(|e| AddonError::WriteError(format!("{}: {}", dir.display(), e)))?;
        write(
            &dir.join("info.ini"),
            &format!(
                "name = {name}\ntitle = {name}\nintro = \nauthor = \nversion = 1.0.0\nstate = 0\n"
            ),
        )?;
        write(
            &dir.join("config.toml"),
            "# Addon configuration definition.\n",
        )?;
        info!("created addon scaffold '{}'", name);
        Ok(dir)
    }

    /// Descriptors of every installed addon, sorted by name.
    pub fn list(&self) -> Result<Vec<AddonDescriptor>, AddonError> {
        self.metadata.list()
    }
}
