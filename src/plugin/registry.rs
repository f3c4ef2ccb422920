use crate::log::log_sink::LogSink;
use crate::plugin::{callbacks::GatewayCallbacks, plugin::Plugin};
use crate::{sink_info, sink_warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Compile-time plugin registry.
///
/// Plugins register before the core starts; `init_all` respects the
/// `plugins.disable` configuration list. Lookup is by package identifier,
/// the same string clients use in `attach` requests.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.package(), plugin);
    }

    pub fn get(&self, package: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(package).cloned()
    }

    pub fn packages(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }

    /// Initialize every registered plugin, dropping the disabled ones and
    /// the ones whose API version does not match.
    pub fn init_all(
        &mut self,
        callbacks: Arc<dyn GatewayCallbacks>,
        config_dir: Option<&str>,
        disabled: &[String],
        logger: &Arc<dyn LogSink>,
    ) {
        self.plugins.retain(|package, plugin| {
            if disabled.iter().any(|d| d == package) {
                sink_info!(logger, "[PLUGIN] {package} disabled by configuration");
                return false;
            }
            if plugin.api_compatibility() != crate::plugin::plugin::PLUGIN_API_VERSION {
                sink_warn!(
                    logger,
                    "[PLUGIN] {package} compiled against API {} (need {}), skipping",
                    plugin.api_compatibility(),
                    crate::plugin::plugin::PLUGIN_API_VERSION
                );
                return false;
            }
            match plugin.init(Arc::clone(&callbacks), config_dir) {
                Ok(()) => {
                    sink_info!(
                        logger,
                        "[PLUGIN] {} {} initialized",
                        plugin.name(),
                        plugin.version_string()
                    );
                    true
                }
                Err(e) => {
                    sink_warn!(logger, "[PLUGIN] {package} failed to initialize: {e}");
                    false
                }
            }
        });
    }

    pub fn destroy_all(&self) {
        for plugin in self.plugins.values() {
            plugin.destroy();
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
