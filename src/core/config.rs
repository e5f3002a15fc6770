//! Pipeline definitions and orchestrator settings loaded from YAML

use crate::core::{
    context::Context,
    pipeline::{ConfigMap, Pipeline, StepConfig},
    template::UnresolvedReferencePolicy,
};
use crate::error::{OrchestratorError, Result};
use crate::execution::scheduler::{OverlapPolicy, SchedulerOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

/// Top-level pipeline definition as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Values seeded into the context before the first step
    #[serde(default)]
    pub variables: ConfigMap,

    /// Pipeline steps, in execution order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "pipeline name must not be empty".to_string(),
            ));
        }
        self.to_pipeline().validate()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            enabled: self.enabled,
            steps: self.steps.clone(),
        }
    }

    pub fn initial_context(&self) -> Context {
        Context::from(self.variables.clone())
    }
}

/// A job entry in the orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub name: String,
    /// Pipeline reference, resolved by the scheduler's pipeline source
    pub pipeline: String,
    pub cron: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub unresolved_references: UnresolvedReferencePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_millis: u64,
    pub overlap: OverlapPolicy,
    pub max_concurrent_runs: Option<usize>,
    pub run_timeout_secs: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            overlap: OverlapPolicy::Allow,
            max_concurrent_runs: None,
            run_timeout_secs: None,
        }
    }
}

impl SchedulerSettings {
    pub fn to_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            tick: Duration::from_millis(self.tick_millis.max(1)),
            overlap: self.overlap,
            max_concurrent_runs: self.max_concurrent_runs,
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Runtime settings for the orchestrator binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of executions the job monitor retains
    pub monitor_capacity: usize,

    /// Directory pipeline references are resolved against
    pub pipeline_dir: Option<String>,

    pub engine: EngineSettings,

    pub scheduler: SchedulerSettings,

    pub jobs: Vec<JobConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor_capacity: 100,
            pipeline_dir: None,
            engine: EngineSettings::default(),
            scheduler: SchedulerSettings::default(),
            jobs: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        let mut seen = std::collections::HashSet::new();
        for job in &config.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "duplicate job id '{}'",
                    job.id
                )));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_pipeline() {
        let yaml = r#"
name: "etl"
description: "nightly load"
version: "1.0"
variables:
  source: "s3://bucket"
steps:
  - name: "extract"
    plugin: "Data_Processing.transform"
    config:
      input: "raw"
      operation: "uppercase"
    output: "extracted"
  - name: "report"
    plugin: "Utility.log"
    config:
      message: "{{ context.extract.result }}"
    output: "report_out"
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let pipeline = config.to_pipeline();
        assert_eq!(pipeline.name, "etl");
        assert!(pipeline.enabled);
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].config.get("input"), Some(&json!("raw")));
        assert_eq!(config.initial_context().get("source"), Some(&json!("s3://bucket")));
    }

    #[test]
    fn test_duplicate_step_name_fails() {
        let yaml = r#"
name: "dup"
steps:
  - { name: "a", plugin: "T.n", output: "x" }
  - { name: "a", plugin: "T.n", output: "y" }
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_output_fails_to_parse() {
        let yaml = r#"
name: "p"
steps:
  - { name: "a", plugin: "T.n" }
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_orchestrator_config_defaults() {
        let config = OrchestratorConfig::from_yaml("jobs: []").unwrap();
        assert_eq!(config.monitor_capacity, 100);
        assert_eq!(config.scheduler.tick_millis, 1000);
        assert_eq!(config.scheduler.overlap, OverlapPolicy::Allow);
        assert_eq!(
            config.engine.unresolved_references,
            UnresolvedReferencePolicy::PassThrough
        );
    }

    #[test]
    fn test_orchestrator_config_full() {
        let yaml = r#"
monitor_capacity: 10
pipeline_dir: "pipelines"
engine:
  unresolved_references: fail
scheduler:
  tick_millis: 250
  overlap: skip
  max_concurrent_runs: 4
  run_timeout_secs: 30
jobs:
  - id: "j1"
    name: "Nightly"
    pipeline: "etl.yaml"
    cron: "0 2 * * *"
  - id: "j2"
    name: "Paused"
    pipeline: "etl.yaml"
    cron: "*/5 * * * *"
    enabled: false
"#;
        let config = OrchestratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.monitor_capacity, 10);
        assert_eq!(config.engine.unresolved_references, UnresolvedReferencePolicy::Fail);
        let options = config.scheduler.to_options();
        assert_eq!(options.tick, Duration::from_millis(250));
        assert_eq!(options.overlap, OverlapPolicy::Skip);
        assert_eq!(options.max_concurrent_runs, Some(4));
        assert_eq!(options.run_timeout, Some(Duration::from_secs(30)));
        assert!(config.jobs[0].enabled);
        assert!(!config.jobs[1].enabled);
    }

    #[test]
    fn test_duplicate_job_id_fails() {
        let yaml = r#"
jobs:
  - { id: "j1", name: "a", pipeline: "p.yaml", cron: "* * * * *" }
  - { id: "j1", name: "b", pipeline: "p.yaml", cron: "* * * * *" }
"#;
        assert!(OrchestratorConfig::from_yaml(yaml).is_err());
    }
}
