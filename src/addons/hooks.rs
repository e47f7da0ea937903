//! Hook table and dispatch.
//!
//! The hook table maps hook names to the ordered list of addons that
//! answer them. It is rebuilt lazily from the enabled addons on disk,
//! cached until a lifecycle operation invalidates it, and always
//! rebuilt when the host runs in debug mode.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::descriptor::AddonDescriptor;
use super::{AddonRegistry, CacheScope, CacheSync, BASE_CAPABILITIES};
use crate::config::HostConfig;

/// Hook dispatched to every enabled addon the first time the hook table
/// is built, so addons can set up per-process state.
pub const ADDON_INIT_HOOK: &str = "AddonInit";

/// One addon answering one hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    pub addon: String,
    pub hook: String,
}

/// Hook name to bindings, bindings in registration order.
pub type HookTable = BTreeMap<String, Vec<HookBinding>>;

/// Builds and caches the hook table, and dispatches hooks through it.
pub struct HookRegistry {
    config: Arc<HostConfig>,
    registry: Arc<AddonRegistry>,
    cache_sync: Arc<dyn CacheSync>,
    table: RwLock<Option<HookTable>>,
    initialized: RwLock<bool>,
}

impl HookRegistry {
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
            table: RwLock::new(None),
            initialized: RwLock::new(false),
        }
    }

    /// Returns the hook table, building it if needed. Debug mode always
    /// rebuilds so hook edits show up without an explicit refresh.
    pub fn table(&self) -> HookTable {
        if !self.config.debug {
            if let Ok(cached) = self.table.read() {
                if let Some(ref table) = *cached {
                    return table.clone();
                }
            }
        }
        self.rebuild()
    }

    /// Drops the cached table and rebuilds it now.
    pub fn refresh(&self) {
        self.invalidate();
        self.rebuild();
    }

    /// Drops the cached table and broadcasts the invalidation.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.table.write() {
            *cached = None;
        }
        self.cache_sync.publish(CacheScope::Hooks, None);
    }

    fn rebuild(&self) -> HookTable {
        let table = self.scan();

        if let Ok(mut cached) = self.table.write() {
            *cached = Some(table.clone());
        }

        let first_build = self
            .initialized
            .write()
            .map(|mut init| !std::mem::replace(&mut *init, true))
            .unwrap_or(false);
        if first_build {
            self.dispatch(ADDON_INIT_HOOK, &serde_json::Value::Null, false);
        }

        table
    }

    /// Scans the enabled addons on disk and assembles their declared
    /// hooks, then merges the statically configured bindings.
    fn scan(&self) -> HookTable {
        let base: HashSet<&str> = BASE_CAPABILITIES.iter().copied().collect();
        let mut table = HookTable::new();

        for name in self.enabled_addons() {
            let Some(handle) = self.registry.get(&name) else {
                debug!("addon '{}' has no registered handle, skipping hooks", name);
                continue;
            };
            for hook in handle.hooks() {
                if base.contains(hook.as_str()) {
                    continue;
                }
                table.entry(hook.clone()).or_default().push(HookBinding {
                    addon: name.clone(),
                    hook,
                });
            }
        }

        for (hook, addons) in self.config.static_hooks() {
            let bindings = table.entry(hook.clone()).or_default();
            for addon in addons {
                if bindings.iter().any(|b| b.addon == addon) {
                    continue;
                }
                bindings.push(HookBinding {
                    addon,
                    hook: hook.clone(),
                });
            }
        }

        debug!("hook table rebuilt with {} hooks", table.len());
        table
    }

    /// Addon names on disk with `state = 1`, sorted.
    fn enabled_addons(&self) -> Vec<String> {
        let Ok(addons_path) = self.config.addons_path() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(&addons_path) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| {
                let ini = addons_path.join(name).join("info.ini");
                let Ok(text) = fs::read_to_string(&ini) else {
                    return false;
                };
                AddonDescriptor::parse(&text)
                    .map(|d| d.state() == super::AddonState::Enabled)
                    .unwrap_or(false)
            })
            .collect();
        names.sort();
        names
    }

    /// Dispatches `hook` to every bound addon in table order.
    ///
    /// Handler errors are logged and skipped. With `first_only` set the
    /// first non-empty result is returned; otherwise all results are
    /// concatenated.
    pub fn dispatch(
        &self,
        hook: &str,
        params: &serde_json::Value,
        first_only: bool,
    ) -> Option<String> {
        let bindings = match hook {
            // AddonInit reaches every registered addon, bound or not.
            ADDON_INIT_HOOK => self
                .enabled_addons()
                .into_iter()
                .map(|addon| HookBinding {
                    addon,
                    hook: ADDON_INIT_HOOK.to_string(),
                })
                .collect(),
            _ => self.table().get(hook).cloned().unwrap_or_default(),
        };

        let mut combined = String::new();
        for binding in bindings {
            let Some(handle) = self.registry.get(&binding.addon) else {
                continue;
            };
            match handle.handle_hook(hook, params) {
                Ok(Some(output)) => {
                    if first_only {
                        return Some(output);
                    }
                    combined.push_str(&output);
                }
                Ok(None) => {}
                Err(e) => warn!("hook '{}' failed in addon '{}': {}", hook, binding.addon, e),
            }
        }

        if combined.is_empty() {
            None
        } else {
            Some(combined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{Addon, AddonError};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct HookedAddon {
        name: String,
        hooks: Vec<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Addon for HookedAddon {
        fn name(&self) -> &str {
            &self.name
        }
        fn install(&self) -> Result<(), AddonError> {
            Ok(())
        }
        fn uninstall(&self) -> Result<(), AddonError> {
            Ok(())
        }
        fn hooks(&self) -> Vec<String> {
            self.hooks.clone()
        }
        fn handle_hook(
            &self,
            hook: &str,
            _params: &serde_json::Value,
        ) -> Result<Option<String>, AddonError> {
            self.calls.lock().unwrap().push(format!("{}:{}", self.name, hook));
            Ok(Some(format!("[{}]", self.name)))
        }
    }

    fn write_addon(root: &std::path::Path, name: &str, state: i64) {
        let dir = root.join("addons").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("info.ini"),
            format!(
                "name = {}\ntitle = {}\nintro = t\nauthor = a\nversion = 1.0.0\nstate = {}\n",
                name, name, state
            ),
        )
        .unwrap();
    }

    fn setup(
        hooks: Vec<&str>,
    ) -> (TempDir, HookRegistry, Arc<Mutex<Vec<String>>>) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(HostConfig::with_root(dir.path().to_path_buf()));
        write_addon(dir.path(), "shop", 1);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(AddonRegistry::new());
        registry.register(Arc::new(HookedAddon {
            name: "shop".to_string(),
            hooks: hooks.into_iter().map(String::from).collect(),
            calls: Arc::clone(&calls),
        }));

        let hooks = HookRegistry::new(config, registry, Arc::new(super::super::NoopCacheSync));
        (dir, hooks, calls)
    }

    #[test]
    fn test_base_capabilities_never_become_hooks() {
        let (_dir, hooks, _calls) = setup(vec!["Install", "Uninstall", "OrderComplete"]);

        let table = hooks.table();
        assert_eq!(table.len(), 1);
        let bindings = table.get("OrderComplete").unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].addon, "shop");
    }

    #[test]
    fn test_disabled_addons_excluded() {
        let (dir, hooks, _calls) = setup(vec!["OrderComplete"]);
        write_addon(dir.path(), "blog", 0);

        let table = hooks.table();
        assert!(!table.values().flatten().any(|b| b.addon == "blog"));
    }

    #[test]
    fn test_addon_init_dispatched_once() {
        let (_dir, hooks, calls) = setup(vec!["OrderComplete"]);

        hooks.table();
        hooks.refresh();
        let inits = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.ends_with(ADDON_INIT_HOOK))
            .count();
        assert_eq!(inits, 1);
    }

    #[test]
    fn test_dispatch_concatenates_and_first_only_stops() {
        let (_dir, hooks, _calls) = setup(vec!["OrderComplete"]);

        let all = hooks.dispatch("OrderComplete", &serde_json::Value::Null, false);
        assert_eq!(all.as_deref(), Some("[shop]"));

        let first = hooks.dispatch("OrderComplete", &serde_json::Value::Null, true);
        assert_eq!(first.as_deref(), Some("[shop]"));

        assert!(hooks.dispatch("Unbound", &serde_json::Value::Null, false).is_none());
    }

    #[test]
    fn test_static_bindings_merged() {
        let (dir, _unused, calls) = setup(vec![]);
        let mut config = HostConfig::with_root(dir.path().to_path_buf());
        config.hooks.insert(
            "Banner".to_string(),
            crate::config::StaticBinding::One("shop".to_string()),
        );

        let registry = Arc::new(AddonRegistry::new());
        registry.register(Arc::new(HookedAddon {
            name: "shop".to_string(),
            hooks: vec![],
            calls,
        }));
        let hooks = HookRegistry::new(
            Arc::new(config),
            registry,
            Arc::new(super::super::NoopCacheSync),
        );

        let table = hooks.table();
        assert_eq!(table.get("Banner").unwrap()[0].addon, "shop");
    }
}
