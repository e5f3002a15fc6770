//! Bounded, in-memory history of pipeline executions

use crate::core::{ExecutionStatus, JobExecution, TriggerType};
use crate::error::{OrchestratorError, ResourceKind, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Aggregate view over the retained executions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean duration of finished executions
    pub average_duration_ms: f64,
    /// Succeeded over finished executions, 0.0 when nothing finished
    pub success_rate: f64,
}

/// Document written by [`JobMonitor::export_to_json`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorExport {
    pub exported_at: DateTime<Utc>,
    pub capacity: usize,
    pub statistics: JobStatistics,
    pub executions: Vec<JobExecution>,
}

/// Fixed-capacity store of execution records, oldest evicted first
///
/// The monitor never calls out to other components while holding its lock.
pub struct JobMonitor {
    capacity: usize,
    executions: RwLock<VecDeque<JobExecution>>,
}

impl JobMonitor {
    /// Create a monitor retaining at most `capacity` executions (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            executions: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an execution that is waiting to start; returns its id
    pub async fn record_pending(
        &self,
        job_id: Option<String>,
        pipeline: impl Into<String>,
        trigger: TriggerType,
    ) -> String {
        let execution = JobExecution::new(job_id, pipeline, trigger);
        let id = execution.id.clone();
        self.push(execution).await;
        id
    }

    /// Record an execution that starts now; returns its id
    pub async fn record_start(
        &self,
        job_id: Option<String>,
        pipeline: impl Into<String>,
        trigger: TriggerType,
    ) -> String {
        let mut execution = JobExecution::new(job_id, pipeline, trigger);
        execution.start();
        let id = execution.id.clone();
        self.push(execution).await;
        id
    }

    /// Move a pending execution to running
    pub async fn mark_running(&self, id: &str) {
        self.update(id, |execution| execution.start()).await;
    }

    pub async fn record_success(&self, id: &str, result: Value) {
        self.update(id, |execution| execution.succeed(result)).await;
    }

    pub async fn record_failure(&self, id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(id, |execution| execution.fail(error)).await;
    }

    async fn push(&self, execution: JobExecution) {
        let mut executions = self.executions.write().await;
        while executions.len() >= self.capacity {
            if let Some(evicted) = executions.pop_front() {
                debug!("Evicting execution {} from monitor", evicted.id);
            }
        }
        executions.push_back(execution);
    }

    async fn update<F>(&self, id: &str, apply: F)
    where
        F: FnOnce(&mut JobExecution),
    {
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|e| e.id == id) {
            Some(execution) => apply(execution),
            None => warn!("Execution {} is no longer retained; update dropped", id),
        }
    }

    /// All retained executions, oldest first
    pub async fn get_all_executions(&self) -> Vec<JobExecution> {
        self.executions.read().await.iter().cloned().collect()
    }

    pub async fn get_execution(&self, id: &str) -> Result<JobExecution> {
        self.executions
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Execution, id))
    }

    pub async fn get_running_executions(&self) -> Vec<JobExecution> {
        self.executions
            .read()
            .await
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect()
    }

    /// The `limit` most recent executions, newest first
    pub async fn get_recent_executions(&self, limit: usize) -> Vec<JobExecution> {
        self.executions
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Executions belonging to one scheduled job, oldest first
    pub async fn get_job_executions(&self, job_id: &str) -> Vec<JobExecution> {
        self.executions
            .read()
            .await
            .iter()
            .filter(|e| e.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect()
    }

    pub async fn get_statistics(&self) -> JobStatistics {
        let executions = self.executions.read().await;
        compute_statistics(executions.iter())
    }

    /// Serialize the retained snapshot as pretty-printed JSON
    pub async fn export_to_json(&self) -> Result<Vec<u8>> {
        let executions = self.get_all_executions().await;
        let export = MonitorExport {
            exported_at: Utc::now(),
            capacity: self.capacity,
            statistics: compute_statistics(executions.iter()),
            executions,
        };
        Ok(serde_json::to_vec_pretty(&export)?)
    }
}

fn compute_statistics<'a>(executions: impl Iterator<Item = &'a JobExecution>) -> JobStatistics {
    let mut stats = JobStatistics::default();
    let mut total_duration_ms: u64 = 0;
    let mut timed = 0usize;

    for execution in executions {
        stats.total += 1;
        match execution.status {
            ExecutionStatus::Pending => stats.pending += 1,
            ExecutionStatus::Running => stats.running += 1,
            ExecutionStatus::Succeeded => stats.succeeded += 1,
            ExecutionStatus::Failed => stats.failed += 1,
        }
        if let Some(duration) = execution.duration_ms {
            total_duration_ms += duration;
            timed += 1;
        }
    }

    if timed > 0 {
        stats.average_duration_ms = total_duration_ms as f64 / timed as f64;
    }
    let finished = stats.succeeded + stats.failed;
    if finished > 0 {
        stats.success_rate = stats.succeeded as f64 / finished as f64;
    }
    stats
}
