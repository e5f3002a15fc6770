//! CLI output formatting

use crate::core::{ExecutionStatus, JobExecution};
use crate::execution::{ExecutionEvent, JobStatistics, ScheduledJob};
use console::Emoji;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static CLOCK: Emoji<'_, '_> = Emoji("🕑 ", "@ ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps
        ),
        ExecutionEvent::StepStarted {
            step,
            plugin,
            index,
        } => format!(
            "{} [{}] {} {}",
            SPINNER,
            index + 1,
            style(step).cyan(),
            style(plugin).dim()
        ),
        ExecutionEvent::StepCompleted {
            step,
            output_key,
            duration_ms,
        } => format!(
            "{} {} → {} {}",
            CHECK,
            style(step).green(),
            style(output_key).cyan(),
            style(format!("({}ms)", duration_ms)).dim()
        ),
        ExecutionEvent::StepFailed { step, error } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        ExecutionEvent::PipelineCancelled {
            pipeline_name,
            next_step,
        } => format!(
            "{} {} cancelled before {}",
            WARN,
            style(pipeline_name).bold(),
            style(next_step).yellow()
        ),
        ExecutionEvent::PipelineCompleted {
            pipeline_name,
            success,
        } => {
            let status = if *success {
                format!("completed {}", style("successfully").green())
            } else {
                style("failed").red().to_string()
            };
            format!("{} Pipeline {} {}", INFO, style(pipeline_name).bold(), status)
        }
    }
}

/// One line per scheduled job
pub fn format_job(job: &ScheduledJob) -> String {
    let next = job
        .next_fire_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let state = if job.enabled {
        style("enabled").green().to_string()
    } else {
        style("disabled").dim().to_string()
    };
    format!(
        "{} {} ({}) {} [{}] next: {}",
        CLOCK,
        style(&job.id).bold(),
        job.name,
        style(&job.cron_expression).cyan(),
        state,
        style(next).dim()
    )
}

/// One line per execution record
pub fn format_execution(execution: &JobExecution) -> String {
    let icon = match execution.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running | ExecutionStatus::Pending => SPINNER,
    };
    let duration = execution
        .duration_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{} {} - {} - {} - {}",
        icon,
        style(&execution.id[..8.min(execution.id.len())]).dim(),
        style(&execution.pipeline).bold(),
        format_status(execution.status),
        style(duration).dim()
    );
    if let Some(error) = &execution.error {
        line.push_str(&format!(": {}", style(error).red()));
    }
    line
}

pub fn format_statistics(stats: &JobStatistics) -> String {
    format!(
        "{} total, {} succeeded, {} failed, {} running, {} pending; success rate {}, avg {}",
        style(stats.total).bold(),
        style(stats.succeeded).green(),
        style(stats.failed).red(),
        style(stats.running).yellow(),
        style(stats.pending).dim(),
        style(format!("{:.0}%", stats.success_rate * 100.0)).cyan(),
        style(format!("{:.1}ms", stats.average_duration_ms)).dim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TriggerType;

    #[test]
    fn test_format_failed_execution_includes_error() {
        console::set_colors_enabled(false);
        let mut execution = JobExecution::new(None, "etl", TriggerType::Manual);
        execution.start();
        execution.fail("step 'b' exploded");

        let line = format_execution(&execution);
        assert!(line.contains("etl"));
        assert!(line.contains("FAILED"));
        assert!(line.contains("step 'b' exploded"));
    }

    #[test]
    fn test_format_step_event() {
        console::set_colors_enabled(false);
        let line = format_execution_event(&ExecutionEvent::StepStarted {
            step: "extract".to_string(),
            plugin: "Data_Processing.transform".to_string(),
            index: 0,
        });
        assert!(line.contains("[1] extract"));
    }
}
