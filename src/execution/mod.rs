//! Pipeline execution, scheduling and run history

pub mod engine;
pub mod monitor;
pub mod scheduler;
pub mod signal;
pub mod source;

pub use engine::{EngineOptions, ExecutionEngine, ExecutionEvent, ExecutionResult, StepOutcome};
pub use monitor::{JobMonitor, JobStatistics, MonitorExport};
pub use scheduler::{FiredRun, OverlapPolicy, ScheduledJob, Scheduler, SchedulerOptions};
pub use signal::CancelSignal;
pub use source::{FilePipelineSource, InMemoryPipelineSource, PipelineDefinition, PipelineSource};
