//! Built-in plugins shipped with the orchestrator

use crate::core::{ConfigMap, Context, StepConfig, GLOBAL_NAMESPACE};
use crate::error::Result;
use crate::execution::CancelSignal;
use crate::plugin::{require_str, Plugin, PluginError, PluginRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const UTILITY: &str = "Utility";
pub const DATA_PROCESSING: &str = "Data_Processing";

/// Register every built-in plugin with `registry`
pub async fn register_builtin_plugins(registry: &PluginRegistry) -> Result<()> {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(SetContextPlugin),
        Arc::new(GetContextPlugin),
        Arc::new(LogPlugin),
        Arc::new(DelayPlugin),
        Arc::new(TransformPlugin),
    ];
    for plugin in plugins {
        registry.register_plugin(plugin).await?;
    }
    Ok(())
}

/// `Utility.set_context`: writes `value` under `key` in the shared namespace
pub struct SetContextPlugin;

#[async_trait]
impl Plugin for SetContextPlugin {
    fn plugin_type(&self) -> &str {
        UTILITY
    }

    fn plugin_name(&self) -> &str {
        "set_context"
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), PluginError> {
        require_str(config, "key")?;
        if !config.contains_key("value") {
            return Err(PluginError::InvalidConfig("missing field 'value'".to_string()));
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> std::result::Result<Context, PluginError> {
        let key = require_str(&step.config, "key")?;
        let value = step.config.get("value").cloned().unwrap_or(Value::Null);

        let mut globals = serde_json::Map::new();
        globals.insert(key.to_string(), value.clone());

        let mut delta = Context::new();
        delta.insert(GLOBAL_NAMESPACE, globals);
        delta.insert("key", key);
        delta.insert("value", value);
        Ok(delta)
    }
}

/// `Utility.get_context`: reads `key` from the shared namespace
pub struct GetContextPlugin;

#[async_trait]
impl Plugin for GetContextPlugin {
    fn plugin_type(&self) -> &str {
        UTILITY
    }

    fn plugin_name(&self) -> &str {
        "get_context"
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), PluginError> {
        require_str(config, "key").map(|_| ())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        context: &Context,
    ) -> std::result::Result<Context, PluginError> {
        let key = require_str(&step.config, "key")?;
        let value = match (context.global(key), step.config.get("default")) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(PluginError::Failed(format!(
                    "no global context value for '{}'",
                    key
                )))
            }
        };

        let mut delta = Context::new();
        delta.insert("key", key);
        delta.insert("value", value);
        Ok(delta)
    }
}

/// `Utility.log`: emits `message` through tracing and echoes it back
pub struct LogPlugin;

#[async_trait]
impl Plugin for LogPlugin {
    fn plugin_type(&self) -> &str {
        UTILITY
    }

    fn plugin_name(&self) -> &str {
        "log"
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), PluginError> {
        if !config.contains_key("message") {
            return Err(PluginError::InvalidConfig("missing field 'message'".to_string()));
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> std::result::Result<Context, PluginError> {
        let message = match step.config.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        info!(step = %step.name, "{}", message);
        Ok([("message", message)].into_iter().collect())
    }
}

/// `Utility.delay`: sleeps for `millis`, returning early if the run is cancelled
pub struct DelayPlugin;

const DELAY_POLL: Duration = Duration::from_millis(50);

#[async_trait]
impl Plugin for DelayPlugin {
    fn plugin_type(&self) -> &str {
        UTILITY
    }

    fn plugin_name(&self) -> &str {
        "delay"
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), PluginError> {
        match config.get("millis").and_then(Value::as_u64) {
            Some(_) => Ok(()),
            None => Err(PluginError::InvalidConfig(
                "'millis' must be a non-negative integer".to_string(),
            )),
        }
    }

    async fn execute_step(
        &self,
        signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> std::result::Result<Context, PluginError> {
        let millis = step.config.get("millis").and_then(Value::as_u64).unwrap_or(0);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(millis);

        let mut interrupted = false;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            if signal.is_cancelled() {
                interrupted = true;
                break;
            }
            tokio::time::sleep(DELAY_POLL.min(deadline - now)).await;
        }

        let mut delta = Context::new();
        delta.insert("millis", millis);
        delta.insert("interrupted", interrupted);
        Ok(delta)
    }
}

/// `Data_Processing.transform`: simple string transformations of `input`
pub struct TransformPlugin;

const TRANSFORM_OPERATIONS: &[&str] = &["uppercase", "lowercase", "trim", "prefix"];

#[async_trait]
impl Plugin for TransformPlugin {
    fn plugin_type(&self) -> &str {
        DATA_PROCESSING
    }

    fn plugin_name(&self) -> &str {
        "transform"
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), PluginError> {
        require_str(config, "input")?;
        let operation = config
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("prefix");
        if !TRANSFORM_OPERATIONS.contains(&operation) {
            return Err(PluginError::InvalidConfig(format!(
                "unknown operation '{}' (expected one of {})",
                operation,
                TRANSFORM_OPERATIONS.join(", ")
            )));
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> std::result::Result<Context, PluginError> {
        let input = require_str(&step.config, "input")?;
        let operation = step
            .config
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("prefix");

        let result = match operation {
            "uppercase" => input.to_uppercase(),
            "lowercase" => input.to_lowercase(),
            "trim" => input.trim().to_string(),
            "prefix" => {
                let prefix = step
                    .config
                    .get("prefix")
                    .and_then(Value::as_str)
                    .unwrap_or("PROCESSED_");
                format!("{}{}", prefix, input)
            }
            other => {
                return Err(PluginError::InvalidConfig(format!("unknown operation '{}'", other)))
            }
        };

        let mut delta = Context::new();
        delta.insert("input", input);
        delta.insert("operation", operation);
        delta.insert("result", result);
        Ok(delta)
    }
}
