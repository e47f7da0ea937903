//! Published asset linking.
//!
//! Mirrors an enabled addon's `assets/` directory into the host's
//! public web root, and removes the mirror on disable/uninstall. Uses
//! direct filesystem calls (symlink where available, recursive copy
//! otherwise) instead of shelling out.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::AddonError;
use crate::config::HostConfig;

/// Exposes and removes an addon's public asset directory.
pub struct AssetLinker {
    config: Arc<HostConfig>,
}

impl AssetLinker {
    /// Creates a linker over the host config.
    #[must_use]
    pub fn new(config: Arc<HostConfig>) -> Self {
        Self { config }
    }

    /// Publishes the addon's assets under the public root.
    ///
    /// A stale mirror from a previous enable is replaced, so repeated
    /// enables converge on the same published state. Addons without an
    /// `assets/` directory publish nothing.
    pub fn publish(&self, name: &str) -> Result<(), AddonError> {
        let source = self.config.source_assets_dir(name);
        if !source.is_dir() {
            debug!("addon '{}' has no assets to publish", name);
            return Ok(());
        }

        let dest = self.config.published_assets_dir(name);
        self.remove(name)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AddonError::WriteError(format!("{}: {}", parent.display(), e)))?;
        }

        link_or_copy(&source, &dest)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", dest.display(), e)))?;
        debug!("published assets for '{}' at {}", name, dest.display());
        Ok(())
    }

    /// Removes the published mirror. A missing mirror is not an error.
    pub fn remove(&self, name: &str) -> Result<(), AddonError> {
        let dest = self.config.published_assets_dir(name);
        let Ok(meta) = fs::symlink_metadata(&dest) else {
            return Ok(());
        };

        let result = if meta.file_type().is_symlink() {
            fs::remove_file(&dest)
        } else {
            fs::remove_dir_all(&dest)
        };
        result.map_err(|e| AddonError::WriteError(format!("{}: {}", dest.display(), e)))
    }

    /// True while a published mirror exists.
    #[must_use]
    pub fn is_published(&self, name: &str) -> bool {
        fs::symlink_metadata(self.config.published_assets_dir(name)).is_ok()
    }
}

/// Symlinks `source` at `dest` where the platform supports it, falling
/// back to a recursive copy.
fn link_or_copy(source: &Path, dest: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source, dest)
    }
    #[cfg(not(unix))]
    {
        copy_dir_recursive(source, dest)
    }
}

/// Recursively copies a directory.
#[cfg_attr(unix, allow(dead_code))]
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn linker(root: &Path) -> AssetLinker {
        AssetLinker::new(Arc::new(HostConfig::with_root(root)))
    }

    fn make_assets(root: &Path, name: &str) {
        let assets = root.join("addons").join(name).join("assets");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("style.css"), "body {}").unwrap();
    }

    #[test]
    fn test_publish_and_remove() {
        let dir = TempDir::new().unwrap();
        let linker = linker(dir.path());
        make_assets(dir.path(), "shop");

        linker.publish("shop").unwrap();
        assert!(linker.is_published("shop"));
        assert!(
            dir.path()
                .join("public/assets/addons/shop")
                .join("style.css")
                .exists()
        );

        linker.remove("shop").unwrap();
        assert!(!linker.is_published("shop"));
    }

    #[test]
    fn test_publish_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let linker = linker(dir.path());
        make_assets(dir.path(), "shop");

        linker.publish("shop").unwrap();
        linker.publish("shop").unwrap();
        assert!(linker.is_published("shop"));
    }

    #[test]
    fn test_publish_without_assets_is_noop() {
        let dir = TempDir::new().unwrap();
        let linker = linker(dir.path());
        fs::create_dir_all(dir.path().join("addons").join("bare")).unwrap();

        linker.publish("bare").unwrap();
        assert!(!linker.is_published("bare"));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let linker = linker(dir.path());
        assert!(linker.remove("ghost").is_ok());
    }
}
