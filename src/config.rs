//! Host configuration.
//!
//! Paths, remote server settings and statically configured hook bindings
//! for the addon subsystem. Loadable from a TOML file or built
//! programmatically (tests and embedders).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A statically configured hook binding: one addon name or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StaticBinding {
    /// Single addon name, optionally comma-separated.
    One(String),
    /// Explicit list of addon names.
    Many(Vec<String>),
}

impl StaticBinding {
    /// Normalizes to a list of addon names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::One(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Self::Many(v) => v.clone(),
        }
    }
}

/// Host configuration for the addon subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host root directory. Addons live under `<root>/addons/`,
    /// runtime/backup files under `<root>/runtime/addons/`.
    pub root: PathBuf,
    /// Public web root. Published assets land under
    /// `<public_root>/assets/addons/<name>/`.
    pub public_root: PathBuf,
    /// Base URL of the remote addon server.
    pub server_url: String,
    /// Table prefix substituted for `__PREFIX__` in seed SQL.
    pub table_prefix: String,
    /// URL prefix used to populate descriptor `url` fields.
    pub route_prefix: String,
    /// Debug mode: the hook table is rebuilt on every access instead of
    /// being cached.
    pub debug: bool,
    /// Statically configured hook bindings, hook name to addon name(s).
    pub hooks: BTreeMap<String, StaticBinding>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".addonhost");
        let public_root = root.join("public");
        Self {
            root,
            public_root,
            server_url: String::new(),
            table_prefix: String::new(),
            route_prefix: String::from("/addons"),
            debug: false,
            hooks: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    /// Creates a config rooted at the given directory, with the public
    /// root at `<root>/public`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let public_root = root.join("public");
        Self {
            root,
            public_root,
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// A file that sets `root` without `public_root` gets the public
    /// root derived as `<root>/public` rather than the built-in default.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let value: toml::Value = toml::from_str(&content)?;
        let has_public_root = value.get("public_root").is_some();
        let mut config: Self = value.try_into()?;
        if !has_public_root {
            config.public_root = config.root.join("public");
        }
        Ok(config)
    }

    /// Returns the addons root directory, creating it if absent.
    pub fn addons_path(&self) -> std::io::Result<PathBuf> {
        let dir = self.root.join("addons");
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Returns one addon's directory (not necessarily existing).
    #[must_use]
    pub fn addon_dir(&self, name: &str) -> PathBuf {
        self.root.join("addons").join(name)
    }

    /// Returns the backup/runtime directory, creating it if absent.
    pub fn backup_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.root.join("runtime").join("addons");
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Source asset directory inside an addon.
    #[must_use]
    pub fn source_assets_dir(&self, name: &str) -> PathBuf {
        self.addon_dir(name).join("assets")
    }

    /// Published asset directory under the public web root.
    #[must_use]
    pub fn published_assets_dir(&self, name: &str) -> PathBuf {
        self.public_root.join("assets").join("addons").join(name)
    }

    /// URL an addon is reachable under, written into descriptors.
    #[must_use]
    pub fn addon_url(&self, name: &str) -> String {
        format!("{}/{}", self.route_prefix.trim_end_matches('/'), name)
    }

    /// Normalized static hook bindings, hook name to addon names.
    #[must_use]
    pub fn static_hooks(&self) -> BTreeMap<String, Vec<String>> {
        self.hooks
            .iter()
            .map(|(hook, binding)| (hook.clone(), binding.names()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let config = HostConfig::with_root("/tmp/host");
        assert_eq!(config.addon_dir("shop"), PathBuf::from("/tmp/host/addons/shop"));
        assert_eq!(
            config.published_assets_dir("shop"),
            PathBuf::from("/tmp/host/public/assets/addons/shop")
        );
        assert_eq!(
            config.source_assets_dir("shop"),
            PathBuf::from("/tmp/host/addons/shop/assets")
        );
        assert_eq!(config.addon_url("shop"), "/addons/shop");
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.toml");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
root = "/srv/host"
server_url = "https://addons.example.com/download"
table_prefix = "app_"
debug = true

[hooks]
OrderComplete = "shop"
PageFooter = ["shop", "blog"]
"#
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/host"));
        // public_root follows root when the file does not set it
        assert_eq!(config.public_root, PathBuf::from("/srv/host/public"));
        assert_eq!(config.server_url, "https://addons.example.com/download");
        assert!(config.debug);

        let hooks = config.static_hooks();
        assert_eq!(hooks["OrderComplete"], vec!["shop".to_string()]);
        assert_eq!(
            hooks["PageFooter"],
            vec!["shop".to_string(), "blog".to_string()]
        );
    }

    #[test]
    fn test_from_file_explicit_public_root_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.toml");
        fs::write(
            &path,
            "root = \"/srv/host\"\npublic_root = \"/var/www\"\n",
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.public_root, PathBuf::from("/var/www"));
    }

    #[test]
    fn test_static_binding_comma_list() {
        let binding = StaticBinding::One("shop, blog".to_string());
        assert_eq!(binding.names(), vec!["shop".to_string(), "blog".to_string()]);
    }
}
