//! pipeline-orchestrator - plugin-driven pipelines on a cron schedule

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod plugin;

// Re-export commonly used types
pub use core::{Context, ExecutionStatus, JobExecution, Pipeline, StepConfig, TriggerType};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use execution::{CancelSignal, ExecutionEngine, ExecutionEvent, JobMonitor, Scheduler};
pub use plugin::{Plugin, PluginError, PluginRegistry};
