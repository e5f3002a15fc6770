//! Cron scheduler - fires pipelines for due jobs from a background loop

use crate::{
    core::{ExecutionStatus, TriggerType},
    error::{OrchestratorError, ResourceKind, Result},
    execution::{CancelSignal, ExecutionEngine, JobMonitor, PipelineSource},
};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What to do when a job comes due while a previous run is still going
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Start another run alongside the previous one
    #[default]
    Allow,
    /// Skip this fire and wait for the next one
    Skip,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// How often the background loop looks for due jobs
    pub tick: Duration,
    pub overlap: OverlapPolicy,
    /// Upper bound on runs executing at once; `None` is unbounded
    pub max_concurrent_runs: Option<usize>,
    /// Deadline applied to every run, checked between steps
    pub run_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            overlap: OverlapPolicy::Allow,
            max_concurrent_runs: None,
            run_timeout: None,
        }
    }
}

/// Parse a cron expression.
///
/// Five-field expressions are crontab syntax: minute precision, with a `0`
/// seconds field prepended and day-of-week numbered `0`-`7` from Sunday (both
/// `0` and `7` are Sunday). Six- and seven-field expressions start with
/// seconds and number days `1`-`7` from Sunday. `@daily` style aliases are
/// accepted as-is. Times are evaluated in UTC.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let normalized = if trimmed.starts_with('@') {
        trimmed.to_string()
    } else {
        match fields.len() {
            5 => {
                let day_of_week = crontab_day_of_week(fields[4], expression)?;
                format!("0 {} {}", fields[..4].join(" "), day_of_week)
            }
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(OrchestratorError::Scheduling {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, found {}", n),
                })
            }
        }
    };

    Schedule::from_str(&normalized).map_err(|e| OrchestratorError::Scheduling {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite a crontab day-of-week field (`0`-`7`, Sunday is `0` or `7`) into
/// the `1`-`7` numbering the schedule parser expects.
///
/// Ranges, lists and steps are expanded to an explicit list of days. Named
/// days (`MON-FRI`) mean the same in both numberings and pass through.
fn crontab_day_of_week(field: &str, expression: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = || OrchestratorError::Scheduling {
        expression: expression.to_string(),
        reason: format!("invalid day-of-week '{}'", field),
    };
    let parse_day = |value: &str| value.parse::<u32>().map_err(|_| invalid());

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, parse_day(step)?),
            None => (item, 1),
        };
        if step == 0 {
            return Err(invalid());
        }

        let (start, end) = match base.split_once('-') {
            _ if base == "*" => (0, 6),
            Some((start, end)) => (parse_day(start)?, parse_day(end)?),
            None => {
                let day = parse_day(base)?;
                // `n/step` runs to the end of the week
                if item.contains('/') {
                    (day, day.max(6))
                } else {
                    (day, day)
                }
            }
        };
        if end > 7 || start > end {
            return Err(invalid());
        }

        for day in (start..=end).step_by(step as usize) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days
        .iter()
        .map(u32::to_string)
        .chain(named)
        .collect::<Vec<_>>()
        .join(","))
}

/// A recurring binding between a cron expression and a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    /// Pipeline reference handed to the pipeline source
    pub pipeline: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
    /// Runs of this job currently in flight
    pub active_runs: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    schedule: Schedule,
    /// Distinguishes this registration from a later one under the same id
    #[serde(skip)]
    generation: u64,
}

impl ScheduledJob {
    fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_at.is_some_and(|next| next <= now)
    }
}

/// A run the scheduler started
///
/// The background loop drops the handle (fire-and-forget); callers that want
/// to wait for completion can await it.
#[derive(Debug)]
pub struct FiredRun {
    pub job_id: String,
    pub execution_id: String,
    pub handle: JoinHandle<()>,
}

struct SchedulerInner {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    engine: Arc<ExecutionEngine>,
    monitor: Arc<JobMonitor>,
    source: Arc<dyn PipelineSource>,
    options: SchedulerOptions,
    permits: Option<Arc<Semaphore>>,
    generations: AtomicU64,
    shutdown: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

/// Cron scheduler for pipeline jobs
///
/// Cloning is cheap; clones share the same jobs and background loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        monitor: Arc<JobMonitor>,
        source: Arc<dyn PipelineSource>,
        options: SchedulerOptions,
    ) -> Self {
        let permits = options
            .max_concurrent_runs
            .map(|max| Arc::new(Semaphore::new(max.max(1))));
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: RwLock::new(HashMap::new()),
                engine,
                monitor,
                source,
                options,
                permits,
                generations: AtomicU64::new(0),
                shutdown: Mutex::new(None),
            }),
        }
    }

    pub fn monitor(&self) -> &Arc<JobMonitor> {
        &self.inner.monitor
    }

    /// Add an enabled job; fails on a malformed cron expression or a taken id
    pub async fn add_job(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        pipeline: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Result<()> {
        let id = id.into();
        let cron_expression = cron_expression.into();
        let schedule = parse_cron(&cron_expression)?;

        let now = Utc::now();
        let next_fire_at = schedule.after(&now).next();
        if next_fire_at.is_none() {
            return Err(OrchestratorError::Scheduling {
                expression: cron_expression,
                reason: "schedule never fires".to_string(),
            });
        }

        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(OrchestratorError::duplicate(ResourceKind::Job, id));
        }

        let job = ScheduledJob {
            id: id.clone(),
            name: name.into(),
            pipeline: pipeline.into(),
            cron_expression,
            enabled: true,
            next_fire_at,
            last_fired_at: None,
            last_status: None,
            active_runs: 0,
            created_at: now,
            schedule,
            generation: self.inner.generations.fetch_add(1, Ordering::Relaxed),
        };
        info!(
            "Added job {} ({}) for {}, next fire at {:?}",
            job.id, job.cron_expression, job.pipeline, job.next_fire_at
        );
        jobs.insert(id, job);
        Ok(())
    }

    /// Remove a job; runs already started are left to finish
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        match self.inner.jobs.write().await.remove(id) {
            Some(_) => {
                info!("Removed job {}", id);
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Job, id)),
        }
    }

    /// Re-enable a job; its next fire is computed from now
    pub async fn enable_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Job, id))?;
        job.enabled = true;
        job.next_fire_at = job.next_after(Utc::now());
        info!("Enabled job {}, next fire at {:?}", id, job.next_fire_at);
        Ok(())
    }

    pub async fn disable_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Job, id))?;
        job.enabled = false;
        info!("Disabled job {}", id);
        Ok(())
    }

    /// Snapshot of all jobs, ordered by id
    pub async fn get_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.inner.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub async fn get_job(&self, id: &str) -> Result<ScheduledJob> {
        self.inner
            .jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Job, id))
    }

    /// Launch the background tick loop
    pub fn start(&self) -> Result<()> {
        let mut shutdown = self
            .inner
            .shutdown
            .lock()
            .map_err(|_| OrchestratorError::Configuration("scheduler state poisoned".to_string()))?;
        if shutdown.is_some() {
            return Err(OrchestratorError::Configuration(
                "scheduler already started".to_string(),
            ));
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = self.clone();
        let tick = self.inner.options.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let fired = scheduler.fire_due_jobs(Utc::now()).await;
                        if !fired.is_empty() {
                            debug!("Tick fired {} job(s)", fired.len());
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("Scheduler loop stopped");
        });

        *shutdown = Some((stop_tx, handle));
        info!("Scheduler started (tick {:?})", tick);
        Ok(())
    }

    /// Stop the background loop; runs already in flight keep going
    pub async fn stop(&self) {
        let running = match self.inner.shutdown.lock() {
            Ok(mut shutdown) => shutdown.take(),
            Err(_) => None,
        };
        if let Some((stop_tx, handle)) = running {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .shutdown
            .lock()
            .map(|shutdown| shutdown.is_some())
            .unwrap_or(false)
    }

    /// Fire every enabled job whose next fire time is at or before `now`.
    ///
    /// Each fire gets its own task; this never waits for a pipeline to run.
    /// The jobs lock is held until every fire is recorded and spawned, so a
    /// concurrent `remove_job` either wins outright or sees the fire.
    pub async fn fire_due_jobs(&self, now: DateTime<Utc>) -> Vec<FiredRun> {
        let mut jobs = self.inner.jobs.write().await;
        let mut fired = Vec::new();
        for job in jobs.values_mut().filter(|job| job.is_due(now)) {
            job.next_fire_at = job.next_after(now);

            if self.inner.options.overlap == OverlapPolicy::Skip && job.active_runs > 0 {
                warn!(
                    "Skipping fire of job {}: {} run(s) still active",
                    job.id, job.active_runs
                );
                continue;
            }

            info!("Firing job {} ({})", job.id, job.pipeline);
            fired.push(self.launch(job, now, TriggerType::Scheduled).await);
        }
        fired
    }

    /// Run a job right away, regardless of its schedule or enabled flag
    pub async fn trigger_job(&self, id: &str) -> Result<FiredRun> {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Job, id))?;
        info!("Manually triggering job {} ({})", id, job.pipeline);
        Ok(self.launch(job, Utc::now(), TriggerType::Manual).await)
    }

    /// Record a run of `job` with the monitor and spawn it. Called with the
    /// jobs lock held.
    async fn launch(
        &self,
        job: &mut ScheduledJob,
        fired_at: DateTime<Utc>,
        trigger: TriggerType,
    ) -> FiredRun {
        job.last_fired_at = Some(fired_at);
        job.active_runs += 1;
        job.last_status = Some(ExecutionStatus::Running);

        let monitor = &self.inner.monitor;
        let execution_id = if self.inner.permits.is_some() {
            monitor
                .record_pending(Some(job.id.clone()), job.pipeline.clone(), trigger)
                .await
        } else {
            monitor
                .record_start(Some(job.id.clone()), job.pipeline.clone(), trigger)
                .await
        };

        let scheduler = self.clone();
        let run = JobRun {
            job_id: job.id.clone(),
            generation: job.generation,
            pipeline: job.pipeline.clone(),
            execution_id: execution_id.clone(),
        };
        let handle = tokio::spawn(async move {
            scheduler.run_job(run).await;
        });

        FiredRun {
            job_id: job.id.clone(),
            execution_id,
            handle,
        }
    }

    async fn run_job(&self, run: JobRun) {
        let JobRun {
            job_id,
            generation,
            pipeline,
            execution_id,
        } = run;

        let _permit = self.acquire_permit(&execution_id).await;
        let status = match self.execute_isolated(pipeline).await {
            Ok(context) => {
                info!("Job {} run {} succeeded", job_id, execution_id);
                self.inner
                    .monitor
                    .record_success(&execution_id, context)
                    .await;
                ExecutionStatus::Succeeded
            }
            Err(message) => {
                error!("Job {} run {} failed: {}", job_id, execution_id, message);
                self.inner
                    .monitor
                    .record_failure(&execution_id, message)
                    .await;
                ExecutionStatus::Failed
            }
        };
        self.finish_run(&job_id, generation, status).await;
    }

    async fn acquire_permit(&self, execution_id: &str) -> Option<OwnedSemaphorePermit> {
        let permits = self.inner.permits.clone()?;
        let permit = permits.acquire_owned().await.ok();
        self.inner.monitor.mark_running(execution_id).await;
        permit
    }

    /// Load and run a pipeline on its own task so a panic in either the
    /// source or a plugin stays contained
    async fn execute_isolated(&self, pipeline_ref: String) -> std::result::Result<Value, String> {
        let source = self.inner.source.clone();
        let engine = self.inner.engine.clone();
        let run_timeout = self.inner.options.run_timeout;
        let run = tokio::spawn(load_and_execute(source, engine, run_timeout, pipeline_ref));

        match run.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Err(format!("pipeline panicked: {}", panic_message(join_error)))
            }
            Err(join_error) => Err(format!("pipeline task aborted: {}", join_error)),
        }
    }

    /// Settle a finished run against the registration that started it. A job
    /// removed and re-added under the same id in the meantime is left alone.
    async fn finish_run(&self, job_id: &str, generation: u64, status: ExecutionStatus) {
        let mut jobs = self.inner.jobs.write().await;
        match jobs.get_mut(job_id).filter(|job| job.generation == generation) {
            Some(job) => {
                job.active_runs = job.active_runs.saturating_sub(1);
                job.last_status = Some(status);
            }
            None => debug!("Job {} was removed before its run finished", job_id),
        }
    }
}

/// Identifies a spawned run and the registration it belongs to
struct JobRun {
    job_id: String,
    generation: u64,
    pipeline: String,
    execution_id: String,
}

async fn load_and_execute(
    source: Arc<dyn PipelineSource>,
    engine: Arc<ExecutionEngine>,
    run_timeout: Option<Duration>,
    pipeline_ref: String,
) -> std::result::Result<Value, String> {
    let definition = source.load(&pipeline_ref).await.map_err(|e| e.to_string())?;

    let signal = match run_timeout {
        Some(timeout) => CancelSignal::with_timeout(timeout),
        None => CancelSignal::new(),
    };
    let result = engine
        .execute_pipeline(&signal, &definition.pipeline, definition.initial_context)
        .await;
    match result.error {
        None => Ok(result.context.to_value()),
        Some(e) => Err(e.to_string()),
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    let payload = join_error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
