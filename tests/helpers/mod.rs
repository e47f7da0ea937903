//! Shared fixtures for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use addonhost::addons::{
    Addon, AddonError, AddonRegistry, AddonService, LocalArchiveSource, MemoryStore, NoopCacheSync,
    TransactionalStore,
};
use addonhost::config::HostConfig;

/// Addon double recording every lifecycle call it receives.
pub struct RecordingAddon {
    pub name: String,
    pub hooks: Vec<String>,
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Lifecycle methods listed here return an error when invoked.
    pub failing: Vec<String>,
}

impl RecordingAddon {
    pub fn new(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            hooks: Vec::new(),
            calls,
            failing: Vec::new(),
        }
    }

    fn record(&self, method: &str) -> Result<(), AddonError> {
        self.calls.lock().unwrap().push(method.to_string());
        if self.failing.iter().any(|f| f == method) {
            return Err(AddonError::Unknown(format!("{} deliberately failed", method)));
        }
        Ok(())
    }
}

impl Addon for RecordingAddon {
    fn name(&self) -> &str {
        &self.name
    }
    fn install(&self) -> Result<(), AddonError> {
        self.record("install")
    }
    fn uninstall(&self) -> Result<(), AddonError> {
        self.record("uninstall")
    }
    fn enable(&self) -> Result<(), AddonError> {
        self.record("enable")
    }
    fn disable(&self) -> Result<(), AddonError> {
        self.record("disable")
    }
    fn upgrade(&self, from_version: &str) -> Result<(), AddonError> {
        self.record(&format!("upgrade:{}", from_version))
    }
    fn hooks(&self) -> Vec<String> {
        self.hooks.clone()
    }
}

/// One file inside a generated addon archive.
pub struct ArchiveEntry {
    pub path: &'static str,
    pub contents: String,
}

/// Builds a descriptor for a syntactically complete addon.
pub fn info_ini(name: &str, version: &str, state: i64) -> String {
    format!(
        "name = {name}\ntitle = {name} addon\nintro = test fixture\nauthor = tester\nversion = {version}\nstate = {state}\n"
    )
}

/// Writes an addon zip with the given entries into `dir` and returns
/// its path. Entry paths use `/` separators; a trailing `/` adds an
/// explicit directory entry.
pub fn make_addon_zip(dir: &Path, name: &str, entries: &[ArchiveEntry]) -> PathBuf {
    let path = dir.join(format!("{name}.zip"));
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();

    for entry in entries {
        if entry.path.ends_with('/') {
            writer.add_directory(entry.path.trim_end_matches('/'), options).unwrap();
        } else {
            writer.start_file(entry.path, options).unwrap();
            writer.write_all(entry.contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap();
    path
}

/// A minimal installable archive: descriptor, seed SQL and one asset.
pub fn standard_addon_zip(dir: &Path, name: &str, version: &str) -> PathBuf {
    make_addon_zip(
        dir,
        name,
        &[
            ArchiveEntry {
                path: "info.ini",
                contents: info_ini(name, version, 0),
            },
            ArchiveEntry {
                path: "install.sql",
                contents: "INSERT INTO __PREFIX__settings VALUES (1);\n".to_string(),
            },
            ArchiveEntry {
                path: "assets/style.css",
                contents: "body {}\n".to_string(),
            },
        ],
    )
}

/// Everything a lifecycle test needs, wired over a temp directory.
pub struct Harness {
    pub config: Arc<HostConfig>,
    pub registry: Arc<AddonRegistry>,
    pub store: Arc<MemoryStore>,
    pub service: AddonService,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Builds a harness whose archive source serves the given local
    /// archives by addon name.
    pub fn new(root: &Path, archives: &[(&str, PathBuf)]) -> Self {
        let config = Arc::new(HostConfig::with_root(root.to_path_buf()));
        let registry = Arc::new(AddonRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut source = LocalArchiveSource::new();
        for (name, path) in archives {
            source.insert(name, path.clone());
        }

        let service = AddonService::with_source(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn TransactionalStore>,
            Arc::new(source),
            Arc::new(NoopCacheSync),
        );

        Self {
            config,
            registry,
            store,
            service,
            calls,
        }
    }

    /// Registers a recording addon handle.
    pub fn register(&self, name: &str) {
        self.registry
            .register(Arc::new(RecordingAddon::new(name, Arc::clone(&self.calls))));
    }

    /// Registers a recording addon handle whose listed lifecycle
    /// methods fail.
    pub fn register_failing(&self, name: &str, failing: &[&str]) {
        let mut addon = RecordingAddon::new(name, Arc::clone(&self.calls));
        addon.failing = failing.iter().map(ToString::to_string).collect();
        self.registry.register(Arc::new(addon));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn addon_dir(&self, name: &str) -> PathBuf {
        self.config.addon_dir(name)
    }

    /// Raw descriptor text currently on disk.
    pub fn info_on_disk(&self, name: &str) -> String {
        fs::read_to_string(self.addon_dir(name).join("info.ini")).unwrap()
    }
}

/// Convenience for operations taking no extra request parameters.
pub fn no_extend() -> BTreeMap<String, String> {
    BTreeMap::new()
}
