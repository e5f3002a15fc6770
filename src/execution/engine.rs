//! Main execution engine - runs a pipeline's steps in order

use crate::{
    core::{Context, Pipeline, StepConfig, StepStatus, TemplateResolver, UnresolvedReferencePolicy},
    error::OrchestratorError,
    execution::CancelSignal,
    plugin::PluginRegistry,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step: String,
        plugin: String,
        index: usize,
    },
    StepCompleted {
        step: String,
        output_key: String,
        duration_ms: u64,
    },
    StepFailed {
        step: String,
        error: String,
    },
    PipelineCancelled {
        pipeline_name: String,
        next_step: String,
    },
    PipelineCompleted {
        pipeline_name: String,
        success: bool,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Engine behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub unresolved_references: UnresolvedReferencePolicy,
}

/// Record of one step that ran
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub plugin: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// True only if every step completed
    pub success: bool,

    /// First failure, tagged with pipeline and step
    pub error: Option<OrchestratorError>,

    /// Everything accumulated, whatever the outcome
    pub context: Context,

    pub steps: Vec<StepOutcome>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Convert into a `Result`, discarding the context on failure
    pub fn into_result(self) -> Result<Context, OrchestratorError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.context),
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    registry: Arc<PluginRegistry>,
    options: EngineOptions,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            options: EngineOptions::default(),
            event_handlers: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline against `initial`.
    ///
    /// Steps run strictly in declared order and the run stops at the first
    /// failure. `signal` is consulted before each step; a step that has
    /// already started always runs to completion.
    pub async fn execute_pipeline(
        &self,
        signal: &CancelSignal,
        pipeline: &Pipeline,
        initial: Context,
    ) -> ExecutionResult {
        let span = info_span!("pipeline", name = %pipeline.name);
        self.run(signal, pipeline, initial).instrument(span).await
    }

    async fn run(&self, signal: &CancelSignal, pipeline: &Pipeline, initial: Context) -> ExecutionResult {
        let started_at = Utc::now();
        let mut context = initial;
        let mut steps = Vec::with_capacity(pipeline.steps.len());

        info!("Starting pipeline execution: {} ({} steps)", pipeline.name, pipeline.steps.len());
        self.emit_event(ExecutionEvent::PipelineStarted {
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.steps.len(),
        });

        let error = match self.check_runnable(pipeline) {
            Err(e) => Some(e),
            Ok(()) => self.run_steps(signal, pipeline, &mut context, &mut steps).await.err(),
        };

        let success = error.is_none();
        match &error {
            None => info!("Pipeline execution finished: {} - succeeded", pipeline.name),
            Some(e) => error!("Pipeline execution finished: {} - failed: {}", pipeline.name, e),
        }
        self.emit_event(ExecutionEvent::PipelineCompleted {
            pipeline_name: pipeline.name.clone(),
            success,
        });

        ExecutionResult {
            success,
            error,
            context,
            steps,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn check_runnable(&self, pipeline: &Pipeline) -> Result<(), OrchestratorError> {
        if !pipeline.enabled {
            return Err(OrchestratorError::Configuration(format!(
                "pipeline '{}' is disabled",
                pipeline.name
            )));
        }
        pipeline.validate()
    }

    async fn run_steps(
        &self,
        signal: &CancelSignal,
        pipeline: &Pipeline,
        context: &mut Context,
        outcomes: &mut Vec<StepOutcome>,
    ) -> Result<(), OrchestratorError> {
        // step name -> output key, for steps that completed
        let mut aliases: HashMap<String, String> = HashMap::new();

        for (index, step) in pipeline.steps.iter().enumerate() {
            if signal.is_cancelled() {
                warn!("Pipeline {} cancelled before step {}", pipeline.name, step.name);
                self.emit_event(ExecutionEvent::PipelineCancelled {
                    pipeline_name: pipeline.name.clone(),
                    next_step: step.name.clone(),
                });
                return Err(OrchestratorError::Cancelled {
                    pipeline: pipeline.name.clone(),
                    step: step.name.clone(),
                });
            }

            self.emit_event(ExecutionEvent::StepStarted {
                step: step.name.clone(),
                plugin: step.plugin.clone(),
                index,
            });

            let started = Instant::now();
            let result = self
                .execute_step(signal, step, context, &aliases)
                .instrument(info_span!("step", name = %step.name, plugin = %step.plugin))
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(delta) => {
                    context.merge_step_output(&step.output, delta);
                    aliases.insert(step.name.clone(), step.output.clone());
                    outcomes.push(StepOutcome {
                        step: step.name.clone(),
                        plugin: step.plugin.clone(),
                        status: StepStatus::Completed,
                        duration_ms,
                    });
                    info!("Step {} completed successfully", step.name);
                    self.emit_event(ExecutionEvent::StepCompleted {
                        step: step.name.clone(),
                        output_key: step.output.clone(),
                        duration_ms,
                    });
                }
                Err(e) => {
                    let error = e.at_step(&pipeline.name, &step.name);
                    outcomes.push(StepOutcome {
                        step: step.name.clone(),
                        plugin: step.plugin.clone(),
                        status: StepStatus::Failed,
                        duration_ms,
                    });
                    error!("Step {} failed: {}", step.name, error);
                    self.emit_event(ExecutionEvent::StepFailed {
                        step: step.name.clone(),
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Resolve, validate and run one step, returning the plugin's delta
    async fn execute_step(
        &self,
        signal: &CancelSignal,
        step: &StepConfig,
        context: &Context,
        aliases: &HashMap<String, String>,
    ) -> Result<Context, OrchestratorError> {
        let plugin_ref = step.plugin_ref()?;
        let plugin = self
            .registry
            .get_plugin(plugin_ref.plugin_type, plugin_ref.plugin_name)
            .await?;

        let mut resolver = TemplateResolver::new(context, aliases);
        let resolved_config = resolver.resolve_map(&step.config);
        if let Some(reference) = resolver.unresolved().first() {
            match self.options.unresolved_references {
                UnresolvedReferencePolicy::PassThrough => {
                    debug!("Passing through unresolved reference {} in step {}", reference, step.name);
                }
                UnresolvedReferencePolicy::Fail => {
                    return Err(OrchestratorError::Configuration(format!(
                        "unresolved reference '{}'",
                        reference
                    )));
                }
            }
        }

        plugin
            .validate_config(&resolved_config)
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        let resolved_step = StepConfig {
            config: resolved_config,
            ..step.clone()
        };
        debug!("Executing step {} with config {:?}", step.name, resolved_step.config);

        plugin
            .execute_step(signal, &resolved_step, context)
            .await
            .map_err(|e| OrchestratorError::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigMap;
    use crate::error::ErrorKind;
    use crate::plugin::{Plugin, PluginError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns `{"processed": "PROCESSED_<input>"}` and counts its calls
    struct TemplatePlugin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for TemplatePlugin {
        fn plugin_type(&self) -> &str {
            "Data_Processing"
        }

        fn plugin_name(&self) -> &str {
            "template"
        }

        fn validate_config(&self, config: &ConfigMap) -> Result<(), PluginError> {
            if config.contains_key("reject") {
                return Err(PluginError::InvalidConfig("rejected".to_string()));
            }
            Ok(())
        }

        async fn execute_step(
            &self,
            _signal: &CancelSignal,
            step: &StepConfig,
            _context: &Context,
        ) -> Result<Context, PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if step.config.contains_key("explode") {
                return Err(PluginError::Failed("exploded".to_string()));
            }
            let input = match step.config.get("input") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Ok([("processed", format!("PROCESSED_{}", input))].into_iter().collect())
        }
    }

    async fn engine_with_plugin() -> (ExecutionEngine, Arc<TemplatePlugin>) {
        let registry = Arc::new(PluginRegistry::new());
        let plugin = Arc::new(TemplatePlugin {
            calls: AtomicUsize::new(0),
        });
        registry.register_plugin(plugin.clone()).await.unwrap();
        (ExecutionEngine::new(registry), plugin)
    }

    #[tokio::test]
    async fn test_single_step_result_lands_under_output_key() {
        let (engine, _) = engine_with_plugin().await;
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out").with_config("input", "x"));

        let result = engine
            .execute_pipeline(&CancelSignal::new(), &pipeline, Context::new())
            .await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.context.lookup(&["a_out", "processed"]), Some(&json!("PROCESSED_x")));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_execution_error_stops_run() {
        let (engine, plugin) = engine_with_plugin().await;
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out").with_config("explode", true))
            .with_step(StepConfig::new("b", "Data_Processing.template", "b_out"));

        let result = engine
            .execute_pipeline(&CancelSignal::new(), &pipeline, Context::new())
            .await;

        assert!(!result.success);
        let error = result.error.clone().unwrap();
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(error.step_name(), Some("a"));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
        assert!(!result.context.contains_key("b_out"));
        assert!(result.into_result().is_err());
    }

    #[tokio::test]
    async fn test_validation_rejection_skips_execution() {
        let (engine, plugin) = engine_with_plugin().await;
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out").with_config("reject", true));

        let result = engine
            .execute_pipeline(&CancelSignal::new(), &pipeline, Context::new())
            .await;

        assert_eq!(result.error.unwrap().kind(), ErrorKind::Validation);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_pipeline_is_rejected() {
        let (engine, plugin) = engine_with_plugin().await;
        let mut pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out"));
        pipeline.enabled = false;

        let result = engine
            .execute_pipeline(&CancelSignal::new(), &pipeline, Context::new())
            .await;

        assert_eq!(result.error.unwrap().kind(), ErrorKind::Configuration);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_signal_starts_no_steps() {
        let (engine, plugin) = engine_with_plugin().await;
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out"));
        let signal = CancelSignal::new();
        signal.cancel();

        let result = engine.execute_pipeline(&signal, &pipeline, Context::new()).await;

        let error = result.error.unwrap();
        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(error.step_name(), Some("a"));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let (engine, _) = engine_with_plugin().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = engine.with_event_handler(move |event| {
            let label = match event {
                ExecutionEvent::PipelineStarted { .. } => "pipeline_started",
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                ExecutionEvent::StepFailed { .. } => "step_failed",
                ExecutionEvent::PipelineCancelled { .. } => "cancelled",
                ExecutionEvent::PipelineCompleted { .. } => "pipeline_completed",
            };
            sink.lock().unwrap().push(label);
        });
        let pipeline = Pipeline::new("p")
            .with_step(StepConfig::new("a", "Data_Processing.template", "a_out"));

        engine
            .execute_pipeline(&CancelSignal::new(), &pipeline, Context::new())
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["pipeline_started", "step_started", "step_completed", "pipeline_completed"]
        );
    }
}
