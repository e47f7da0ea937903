//! Addon descriptors and metadata storage.
//!
//! A descriptor is the `info.ini` record identifying one addon (name,
//! title, version, state, ...). [`MetadataStore`] reads and writes
//! descriptors and addon config definitions, with process-wide caches
//! invalidated by the lifecycle orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::{AddonError, AddonRegistry, CacheScope, CacheSync};
use crate::config::HostConfig;

/// Descriptor keys that must all be present for an addon to be
/// considered complete.
pub const REQUIRED_INFO_KEYS: &[&str] = &["name", "title", "intro", "author", "version", "state"];

/// Whether an installed addon is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddonState {
    /// Installed but inactive.
    #[default]
    Disabled,
    /// Installed and active; assets are published.
    Enabled,
}

impl AddonState {
    /// Integer form stored in descriptors (0/1).
    #[must_use]
    pub fn as_int(self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
        }
    }
}

/// A typed scalar from an INI descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum IniValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl IniValue {
    /// Typed scanning of a raw INI value: surrounding quotes force a
    /// string, otherwise booleans and integers are recognized.
    #[must_use]
    pub fn scan(raw: &str) -> Self {
        let raw = raw.trim();
        for quote in ['"', '\''] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Self::Str(raw[1..raw.len() - 1].to_string());
            }
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" => return Self::Bool(true),
            "false" | "off" | "no" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Self::Int(n);
        }
        Self::Str(raw.to_string())
    }
}

impl std::fmt::Display for IniValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Identity and metadata for one addon, in descriptor-file order.
///
/// Top-level scalars are serialized as `key = value` lines, sections as
/// `[section]` blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddonDescriptor {
    scalars: Vec<(String, IniValue)>,
    sections: Vec<(String, Vec<(String, IniValue)>)>,
}

impl AddonDescriptor {
    /// Parses INI text into a descriptor.
    pub fn parse(text: &str) -> Result<Self, AddonError> {
        let mut descriptor = Self::default();
        let mut current_section: Option<usize> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_string();
                descriptor.sections.push((name, Vec::new()));
                current_section = Some(descriptor.sections.len() - 1);
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                return Err(AddonError::InvalidPackage(format!(
                    "malformed descriptor line: {line}"
                )));
            };
            let key = key.trim().to_string();
            let value = IniValue::scan(raw);
            match current_section {
                Some(idx) => descriptor.sections[idx].1.push((key, value)),
                None => descriptor.scalars.push((key, value)),
            }
        }

        Ok(descriptor)
    }

    /// Serializes back to INI text: scalars first, then sections.
    #[must_use]
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.scalars {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        for (name, entries) in &self.sections {
            out.push_str(&format!("[{}]\n", name));
            for (key, value) in entries {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out
    }

    /// True if the descriptor has no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.sections.is_empty()
    }

    /// Looks up a top-level scalar.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.scalars.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Looks up a top-level scalar rendered as a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    /// Sets a top-level scalar, preserving position for existing keys.
    pub fn set(&mut self, key: &str, value: IniValue) {
        if let Some(entry) = self.scalars.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.scalars.push((key.to_string(), value));
        }
    }

    /// Sets a top-level string scalar.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, IniValue::Str(value.to_string()));
    }

    /// Removes a top-level scalar. Returns true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.scalars.len();
        self.scalars.retain(|(k, _)| k != key);
        self.scalars.len() != before
    }

    /// The addon's state field; anything but 1/true reads as disabled.
    #[must_use]
    pub fn state(&self) -> AddonState {
        match self.get("state") {
            Some(IniValue::Int(1)) | Some(IniValue::Bool(true)) => AddonState::Enabled,
            _ => AddonState::Disabled,
        }
    }

    /// Sets the state field.
    pub fn set_state(&mut self, state: AddonState) {
        self.set("state", IniValue::Int(state.as_int()));
    }

    /// Shallow merge: `patch` keys overwrite, sections are replaced whole.
    pub fn merge(&mut self, patch: &AddonDescriptor) {
        for (key, value) in &patch.scalars {
            self.set(key, value.clone());
        }
        for (name, entries) in &patch.sections {
            if let Some(section) = self.sections.iter_mut().find(|(n, _)| n == name) {
                section.1 = entries.clone();
            } else {
                self.sections.push((name.clone(), entries.clone()));
            }
        }
    }

    /// True only when every required descriptor field is present.
    #[must_use]
    pub fn check_info(&self) -> bool {
        REQUIRED_INFO_KEYS.iter().all(|key| self.get(key).is_some())
    }
}

/// One entry in an addon's bundled config definition (`config.toml`).
///
/// The rich form (type, label, default) is only consumed by
/// administrative tooling; runtime callers get the collapsed key→value
/// view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Field type hint for administrative UI.
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Current value.
    pub value: toml::Value,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<toml::Value>,
}

/// Collapsed runtime view of an addon config.
pub type ConfigValues = BTreeMap<String, toml::Value>;

/// Reads and writes per-addon descriptors and config, with
/// process-wide caches.
///
/// The lifecycle orchestrator owns invalidation; outside callers never
/// mutate the caches directly.
pub struct MetadataStore {
    config: Arc<HostConfig>,
    registry: Arc<AddonRegistry>,
    cache_sync: Arc<dyn CacheSync>,
    descriptors: RwLock<HashMap<String, AddonDescriptor>>,
    configs: RwLock<HashMap<String, ConfigValues>>,
}

impl MetadataStore {
    /// Creates a store over the given host config and addon registry.
    #[must_use]
    pub fn new(
        config: Arc<HostConfig>,
        registry: Arc<AddonRegistry>,
        cache_sync: Arc<dyn CacheSync>,
    ) -> Self {
        Self {
            config,
            registry,
            cache_sync,
            descriptors: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
        }
    }

    fn info_path(&self, name: &str) -> std::path::PathBuf {
        self.config.addon_dir(name).join("info.ini")
    }

    fn config_path(&self, name: &str) -> std::path::PathBuf {
        self.config.addon_dir(name).join("config.toml")
    }

    /// Reads one addon's descriptor.
    ///
    /// `Err(NotFound)` when the addon directory does not exist,
    /// `Ok(None)` when it exists but carries no descriptor sources, and
    /// `Ok(Some(_))` otherwise. Cached per addon name; code-declared
    /// defaults from the registered [`super::Addon`] handle win over
    /// file fields.
    pub fn get_info(&self, name: &str) -> Result<Option<AddonDescriptor>, AddonError> {
        if !self.config.addon_dir(name).is_dir() {
            return Err(AddonError::NotFound(name.to_string()));
        }

        if let Ok(cache) = self.descriptors.read() {
            if let Some(descriptor) = cache.get(name) {
                return Ok(Some(descriptor.clone()));
            }
        }

        let info_path = self.info_path(name);
        let mut descriptor = if info_path.is_file() {
            let text = fs::read_to_string(&info_path)
                .map_err(|e| AddonError::WriteError(format!("{}: {}", info_path.display(), e)))?;
            AddonDescriptor::parse(&text)?
        } else {
            AddonDescriptor::default()
        };

        if let Some(handle) = self.registry.get(name) {
            for (key, value) in handle.info_defaults() {
                descriptor.set(&key, IniValue::scan(&value));
            }
        }

        if descriptor.is_empty() {
            return Ok(None);
        }

        descriptor.set_str("url", &self.config.addon_url(name));

        if let Ok(mut cache) = self.descriptors.write() {
            cache.insert(name.to_string(), descriptor.clone());
        }
        Ok(Some(descriptor))
    }

    /// Persists a full descriptor, replacing the on-disk file.
    ///
    /// Refuses descriptors missing name, title or version before
    /// touching the file. The `url` field is derived at read time and
    /// never written to disk.
    pub fn put_info(&self, name: &str, descriptor: &AddonDescriptor) -> Result<(), AddonError> {
        for key in ["name", "title", "version"] {
            if descriptor.get(key).is_none() {
                return Err(AddonError::InvalidPackage(format!(
                    "descriptor for '{name}' missing required field '{key}'"
                )));
            }
        }

        let mut persisted = descriptor.clone();
        persisted.remove("url");

        let path = self.info_path(name);
        fs::write(&path, persisted.to_ini_string())
            .map_err(|e| AddonError::WriteError(format!("{}: {}", path.display(), e)))?;
        self.invalidate(name);
        Ok(())
    }

    /// Merges `patch` over the current descriptor and persists the
    /// result. Returns the merged descriptor.
    pub fn set_info(
        &self,
        name: &str,
        patch: &AddonDescriptor,
    ) -> Result<AddonDescriptor, AddonError> {
        let mut merged = self.get_info(name)?.unwrap_or_default();
        merged.merge(patch);
        self.put_info(name, &merged)?;
        Ok(merged)
    }

    /// Loads the full (rich) config definition. Never cached.
    pub fn get_config_raw(&self, name: &str) -> Result<BTreeMap<String, ConfigField>, AddonError> {
        let path = self.config_path(name);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| AddonError::InvalidPackage(format!("config for '{name}': {e}")))
    }

    /// Loads the collapsed key→value config. Only this form is cached.
    pub fn get_config(&self, name: &str) -> Result<ConfigValues, AddonError> {
        if let Ok(cache) = self.configs.read() {
            if let Some(values) = cache.get(name) {
                return Ok(values.clone());
            }
        }

        let values: ConfigValues = self
            .get_config_raw(name)?
            .into_iter()
            .map(|(key, field)| (key, field.value))
            .collect();

        if let Ok(mut cache) = self.configs.write() {
            cache.insert(name.to_string(), values.clone());
        }
        Ok(values)
    }

    /// Writes config values back into the addon's definition file,
    /// preserving the rich per-key metadata. Used by upgrade to restore
    /// prior settings after re-extraction.
    pub fn set_config(&self, name: &str, values: &ConfigValues) -> Result<(), AddonError> {
        let mut fields = self.get_config_raw(name)?;
        for (key, value) in values {
            match fields.get_mut(key) {
                Some(field) => field.value = value.clone(),
                None => {
                    fields.insert(
                        key.clone(),
                        ConfigField {
                            field_type: String::new(),
                            label: String::new(),
                            value: value.clone(),
                            default: None,
                        },
                    );
                }
            }
        }

        let path = self.config_path(name);
        let text = toml::to_string(&fields)
            .map_err(|e| AddonError::Unknown(format!("config for '{name}': {e}")))?;
        fs::write(&path, text)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", path.display(), e)))?;
        self.invalidate(name);
        Ok(())
    }

    /// Drops one addon's cached descriptor and config, and broadcasts
    /// the invalidation.
    pub fn invalidate(&self, name: &str) {
        if let Ok(mut cache) = self.descriptors.write() {
            cache.remove(name);
        }
        if let Ok(mut cache) = self.configs.write() {
            cache.remove(name);
        }
        self.cache_sync.publish(CacheScope::Descriptors, Some(name));
    }

    /// Drops all cached metadata and broadcasts the invalidation.
    pub fn invalidate_all(&self) {
        if let Ok(mut cache) = self.descriptors.write() {
            cache.clear();
        }
        if let Ok(mut cache) = self.configs.write() {
            cache.clear();
        }
        self.cache_sync.publish(CacheScope::Descriptors, None);
    }

    /// Lists descriptors for every addon directory carrying a parseable
    /// `info.ini` with a name, bypassing the cache. Sorted by directory
    /// name.
    pub fn list(&self) -> Result<Vec<AddonDescriptor>, AddonError> {
        let root = self
            .config
            .addons_path()
            .map_err(|e| AddonError::WriteError(e.to_string()))?;

        let mut names: Vec<String> = fs::read_dir(&root)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", root.display(), e)))?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut list = Vec::new();
        for name in names {
            let info_path = root.join(&name).join("info.ini");
            if !info_path.is_file() {
                continue;
            }
            let Ok(text) = fs::read_to_string(&info_path) else {
                continue;
            };
            let Ok(mut descriptor) = AddonDescriptor::parse(&text) else {
                continue;
            };
            if descriptor.get("name").is_none() {
                continue;
            }
            descriptor.set_str("url", &self.config.addon_url(&name));
            list.push(descriptor);
        }
        Ok(list)
    }
}
