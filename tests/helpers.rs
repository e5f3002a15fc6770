//! Test utilities shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_orchestrator::core::{ConfigMap, Context, ExecutionStatus, JobExecution, StepConfig};
use pipeline_orchestrator::error::Result as OrchestratorResult;
use pipeline_orchestrator::execution::{CancelSignal, JobMonitor, PipelineDefinition, PipelineSource};
use pipeline_orchestrator::plugin::{
    register_builtin_plugins, require_str, Plugin, PluginError, PluginRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records the order in which mock plugins ran
#[derive(Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, step: &str) {
        self.calls.lock().unwrap().push(step.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// `Data_Processing.template`: returns `{"processed": "PROCESSED_<input>"}`
pub struct TemplatePlugin {
    pub log: CallLog,
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
        require_str(config, "input").map(|_| ())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> Result<Context, PluginError> {
        self.log.record(&step.name);
        let input = require_str(&step.config, "input")?;
        Ok([("processed", format!("PROCESSED_{}", input))]
            .into_iter()
            .collect())
    }
}

/// `Test.fail`: always fails at runtime
pub struct FailingPlugin {
    pub log: CallLog,
}

#[async_trait]
impl Plugin for FailingPlugin {
    fn plugin_type(&self) -> &str {
        "Test"
    }

    fn plugin_name(&self) -> &str {
        "fail"
    }

    fn validate_config(&self, _config: &ConfigMap) -> Result<(), PluginError> {
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> Result<Context, PluginError> {
        self.log.record(&step.name);
        Err(PluginError::Failed("downstream unavailable".to_string()))
    }
}

/// `Test.panic`: panics inside the step
pub struct PanickingPlugin;

#[async_trait]
impl Plugin for PanickingPlugin {
    fn plugin_type(&self) -> &str {
        "Test"
    }

    fn plugin_name(&self) -> &str {
        "panic"
    }

    fn validate_config(&self, _config: &ConfigMap) -> Result<(), PluginError> {
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        _step: &StepConfig,
        _context: &Context,
    ) -> Result<Context, PluginError> {
        panic!("plugin blew up");
    }
}

/// `Test.slow`: sleeps for `millis` while tracking how many runs overlap
#[derive(Default)]
pub struct SlowPlugin {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub completed: AtomicUsize,
}

#[async_trait]
impl Plugin for SlowPlugin {
    fn plugin_type(&self) -> &str {
        "Test"
    }

    fn plugin_name(&self) -> &str {
        "slow"
    }

    fn validate_config(&self, _config: &ConfigMap) -> Result<(), PluginError> {
        Ok(())
    }

    async fn execute_step(
        &self,
        _signal: &CancelSignal,
        step: &StepConfig,
        _context: &Context,
    ) -> Result<Context, PluginError> {
        let millis = step
            .config
            .get("millis")
            .and_then(|v| v.as_u64())
            .unwrap_or(100);

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        Ok([("slept_ms", millis)].into_iter().collect())
    }
}

/// A pipeline source whose loads panic
pub struct PanickingSource;

#[async_trait]
impl PipelineSource for PanickingSource {
    async fn load(&self, reference: &str) -> OrchestratorResult<PipelineDefinition> {
        panic!("corrupt pipeline file {}", reference);
    }
}

/// Everything a test needs to drive the engine against mock plugins
pub struct TestPlugins {
    pub registry: Arc<PluginRegistry>,
    pub log: CallLog,
    pub slow: Arc<SlowPlugin>,
}

/// Fresh registry with the built-ins and every mock plugin registered
pub async fn test_plugins() -> TestPlugins {
    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry).await.unwrap();

    let log = CallLog::default();
    let slow = Arc::new(SlowPlugin::default());
    registry
        .register_plugin(Arc::new(TemplatePlugin { log: log.clone() }))
        .await
        .unwrap();
    registry
        .register_plugin(Arc::new(FailingPlugin { log: log.clone() }))
        .await
        .unwrap();
    registry
        .register_plugin(Arc::new(PanickingPlugin))
        .await
        .unwrap();
    registry.register_plugin(slow.clone()).await.unwrap();

    TestPlugins {
        registry,
        log,
        slow,
    }
}

/// Poll the monitor until the execution reaches a terminal status
pub async fn wait_for_terminal(monitor: &JobMonitor, id: &str) -> JobExecution {
    for _ in 0..200 {
        let execution = monitor.get_execution(id).await.unwrap();
        if execution.status.is_terminal() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} never finished", id);
}

/// Assert an execution finished with the given status
pub fn assert_execution_status(execution: &JobExecution, expected: ExecutionStatus) {
    assert_eq!(
        execution.status, expected,
        "execution {} ({}) ended {:?}, error: {:?}",
        execution.id, execution.pipeline, execution.status, execution.error
    );
}
