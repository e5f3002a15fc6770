//! Step handlers and the registry they are looked up in

pub mod builtin;
pub mod registry;

use crate::core::{ConfigMap, Context, StepConfig};
use crate::execution::CancelSignal;
use async_trait::async_trait;
use thiserror::Error;

pub use builtin::register_builtin_plugins;
pub use registry::PluginRegistry;

/// Error types for plugin operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Failed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Contract every step handler implements
///
/// A plugin is identified by its `(type, name)` pair and lives in the
/// registry for the lifetime of the process. It must not keep per-run state
/// unless it synchronizes it itself; the same instance serves concurrent runs.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn plugin_type(&self) -> &str;

    fn plugin_name(&self) -> &str;

    /// Check a step's (already template-resolved) configuration
    fn validate_config(&self, config: &ConfigMap) -> Result<(), PluginError>;

    /// Run the step and return the values to merge under the step's output key
    ///
    /// `step.config` is the resolved configuration. A `_global` object in the
    /// returned context is merged into the run's shared namespace instead.
    async fn execute_step(
        &self,
        signal: &CancelSignal,
        step: &StepConfig,
        context: &Context,
    ) -> Result<Context, PluginError>;
}

/// Read a required string field from a step config
pub fn require_str<'a>(config: &'a ConfigMap, key: &str) -> Result<&'a str, PluginError> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| PluginError::InvalidConfig(format!("missing string field '{}'", key)))
}
