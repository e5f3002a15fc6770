//! Pipeline domain model

use crate::core::context::GLOBAL_NAMESPACE;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Free-form step configuration handed to plugins
pub type ConfigMap = Map<String, Value>;

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within its pipeline
    pub name: String,

    /// Plugin reference in `Type.Name` form
    pub plugin: String,

    /// Plugin configuration; may contain `context.<step>.<field>` references
    #[serde(default)]
    pub config: ConfigMap,

    /// Context key the step's result is stored under
    pub output: String,
}

/// Parsed `Type.Name` plugin reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRef<'a> {
    pub plugin_type: &'a str,
    pub plugin_name: &'a str,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            config: ConfigMap::new(),
            output: output.into(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Split the plugin reference at its first `.`
    pub fn plugin_ref(&self) -> Result<PluginRef<'_>> {
        match self.plugin.split_once('.') {
            Some((plugin_type, plugin_name)) if !plugin_type.is_empty() && !plugin_name.is_empty() => {
                Ok(PluginRef {
                    plugin_type,
                    plugin_name,
                })
            }
            _ => Err(OrchestratorError::Configuration(format!(
                "step '{}' has malformed plugin reference '{}' (expected Type.Name)",
                self.name, self.plugin
            ))),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A pipeline definition: ordered steps plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Steps, executed strictly in this order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: None,
            enabled: true,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepConfig) -> Self {
        self.steps.push(step);
        self
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check structural invariants: unique step names, non-empty output
    /// keys and well-formed plugin references.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(OrchestratorError::Configuration(format!(
                    "pipeline '{}' has a step without a name",
                    self.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "pipeline '{}' has duplicate step name '{}'",
                    self.name, step.name
                )));
            }
            if step.output.trim().is_empty() {
                return Err(OrchestratorError::Configuration(format!(
                    "step '{}' has an empty output key",
                    step.name
                )));
            }
            if step.output == GLOBAL_NAMESPACE {
                return Err(OrchestratorError::Configuration(format!(
                    "step '{}' cannot use the reserved output key '{}'",
                    step.name, GLOBAL_NAMESPACE
                )));
            }
            step.plugin_ref()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_plugin_ref_splits_at_first_dot() {
        let step = StepConfig::new("a", "Data_Processing.csv.reader", "a_out");
        let plugin = step.plugin_ref().unwrap();
        assert_eq!(plugin.plugin_type, "Data_Processing");
        assert_eq!(plugin.plugin_name, "csv.reader");
    }

    #[test]
    fn test_malformed_plugin_ref() {
        for reference in ["nodot", ".name", "Type."] {
            let step = StepConfig::new("a", reference, "a_out");
            let err = step.plugin_ref().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_duplicate_step_name_fails() {
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "T.n", "x"))
            .with_step(StepConfig::new("a", "T.n", "y"));

        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step name 'a'"));
    }

    #[test]
    fn test_empty_output_key_fails() {
        let pipeline = Pipeline::new("p").with_step(StepConfig::new("a", "T.n", " "));
        assert_eq!(pipeline.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_reserved_global_output_key_fails() {
        let pipeline = Pipeline::new("p").with_step(StepConfig::new("a", "T.n", GLOBAL_NAMESPACE));
        let err = pipeline.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("reserved output key"));
    }

    #[test]
    fn test_valid_pipeline() {
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "T.n", "a_out").with_config("input", "x"))
            .with_step(StepConfig::new("b", "T.n", "b_out"));

        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.step("b").map(|s| s.output.as_str()), Some("b_out"));
    }
}
