//! Resolution of a job's pipeline reference into a runnable pipeline

use crate::core::{config::PipelineConfig, Context, Pipeline};
use crate::error::{OrchestratorError, ResourceKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// A pipeline plus the context its runs start from
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub pipeline: Pipeline,
    pub initial_context: Context,
}

impl From<Pipeline> for PipelineDefinition {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            initial_context: Context::new(),
        }
    }
}

/// Where scheduled jobs get their pipelines from
#[async_trait]
pub trait PipelineSource: Send + Sync {
    /// Load the pipeline a job refers to; called once per fire
    async fn load(&self, reference: &str) -> Result<PipelineDefinition>;
}

/// Loads YAML pipeline definitions from disk, relative to a base directory
pub struct FilePipelineSource {
    base_dir: PathBuf,
}

impl FilePipelineSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl PipelineSource for FilePipelineSource {
    async fn load(&self, reference: &str) -> Result<PipelineDefinition> {
        let path = self.base_dir.join(reference);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrchestratorError::not_found(ResourceKind::Pipeline, path.display().to_string())
            } else {
                OrchestratorError::from(e)
            }
        })?;
        let config = PipelineConfig::from_yaml(&content)?;
        Ok(PipelineDefinition {
            pipeline: config.to_pipeline(),
            initial_context: config.initial_context(),
        })
    }
}

/// Pipelines held in memory (for testing or embedding)
#[derive(Default)]
pub struct InMemoryPipelineSource {
    pipelines: RwLock<HashMap<String, PipelineDefinition>>,
}

impl InMemoryPipelineSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reference: impl Into<String>, definition: impl Into<PipelineDefinition>) {
        self.pipelines
            .write()
            .await
            .insert(reference.into(), definition.into());
    }
}

#[async_trait]
impl PipelineSource for InMemoryPipelineSource {
    async fn load(&self, reference: &str) -> Result<PipelineDefinition> {
        self.pipelines
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Pipeline, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryPipelineSource::new();
        source.insert("pipelines/etl.yaml", Pipeline::new("etl")).await;

        let definition = source.load("pipelines/etl.yaml").await.unwrap();
        assert_eq!(definition.pipeline.name, "etl");
        assert!(definition.initial_context.is_empty());

        let err = source.load("pipelines/other.yaml").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_file_source_reads_yaml() {
        let dir = std::env::temp_dir().join(format!("orchestrator-source-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("etl.yaml"),
            r#"
name: "etl"
variables:
  region: "eu"
steps:
  - { name: "a", plugin: "Utility.log", config: { message: "hi" }, output: "a_out" }
"#,
        )
        .unwrap();

        let source = FilePipelineSource::new(&dir);
        let definition = source.load("etl.yaml").await.unwrap();
        assert_eq!(definition.pipeline.steps.len(), 1);
        assert_eq!(definition.initial_context.get("region"), Some(&serde_json::json!("eu")));

        let missing = source.load("nope.yaml").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        std::fs::remove_dir_all(&dir).ok();
    }
}
