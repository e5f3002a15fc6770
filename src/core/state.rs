//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a tracked pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Recorded but waiting to start (e.g. for a concurrency permit)
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step completed
    Succeeded,
    /// A step failed, the run was cancelled, or the run panicked
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

/// What caused an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

/// Outcome of a single step inside one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One concrete run of a pipeline, as tracked by the job monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Unique execution ID
    pub id: String,

    /// Scheduled job this run belongs to, if any
    pub job_id: Option<String>,

    /// Pipeline reference or name that was run
    pub pipeline: String,

    pub trigger: TriggerType,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    pub duration_ms: Option<u64>,

    pub error: Option<String>,

    /// Final context of the run
    pub result: Option<Value>,
}

impl JobExecution {
    pub fn new(job_id: Option<String>, pipeline: impl Into<String>, trigger: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            pipeline: pipeline.into(),
            trigger,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            error: None,
            result: None,
        }
    }

    /// Mark as running; the start time is reset to now
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    pub fn succeed(&mut self, result: Value) {
        self.finish(ExecutionStatus::Succeeded);
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(ExecutionStatus::Failed);
        self.error = Some(error.into());
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let ended_at = Utc::now();
        self.status = status;
        self.duration_ms = Some(
            ended_at
                .signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.ended_at = Some(ended_at);
    }
}
