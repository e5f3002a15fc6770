//! Process-wide catalog of plugins keyed by (type, name)

use crate::error::{OrchestratorError, ResourceKind, Result};
use crate::plugin::Plugin;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Plugins grouped by type, then by name
pub type PluginsByType = HashMap<String, HashMap<String, Arc<dyn Plugin>>>;

/// Registry of step plugins
///
/// Constructed explicitly and shared through an `Arc`; there is no global
/// instance. Registration is permanent: there is no way to remove a plugin.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<PluginsByType>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own `(type, name)`.
    ///
    /// Fails without touching the existing entry if the key is taken.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let plugin_type = plugin.plugin_type().to_string();
        let plugin_name = plugin.plugin_name().to_string();

        let mut plugins = self.plugins.write().await;
        let by_name = plugins.entry(plugin_type.clone()).or_default();
        if by_name.contains_key(&plugin_name) {
            return Err(OrchestratorError::duplicate(
                ResourceKind::Plugin,
                format!("{}.{}", plugin_type, plugin_name),
            ));
        }
        by_name.insert(plugin_name.clone(), plugin);

        info!("Registered plugin {}.{}", plugin_type, plugin_name);
        Ok(())
    }

    pub async fn get_plugin(&self, plugin_type: &str, plugin_name: &str) -> Result<Arc<dyn Plugin>> {
        let plugins = self.plugins.read().await;
        plugins
            .get(plugin_type)
            .and_then(|by_name| by_name.get(plugin_name))
            .cloned()
            .ok_or_else(|| {
                debug!("Plugin lookup missed: {}.{}", plugin_type, plugin_name);
                OrchestratorError::not_found(
                    ResourceKind::Plugin,
                    format!("{}.{}", plugin_type, plugin_name),
                )
            })
    }

    /// All plugins of one type; empty for an unknown type
    pub async fn get_plugins_by_type(&self, plugin_type: &str) -> HashMap<String, Arc<dyn Plugin>> {
        let plugins = self.plugins.read().await;
        plugins.get(plugin_type).cloned().unwrap_or_default()
    }

    pub async fn get_all_plugins(&self) -> PluginsByType {
        self.plugins.read().await.clone()
    }

    pub async fn list_plugin_types(&self) -> BTreeSet<String> {
        let plugins = self.plugins.read().await;
        plugins
            .iter()
            .filter(|(_, by_name)| !by_name.is_empty())
            .map(|(plugin_type, _)| plugin_type.clone())
            .collect()
    }

    /// Total number of registered plugins
    pub async fn len(&self) -> usize {
        self.plugins.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
