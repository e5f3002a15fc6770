use anyhow::{Context as _, Result};
use pipeline_orchestrator::cli::commands::{
    override_value, PluginsCommand, RunCommand, ScheduleCommand, ValidateCommand,
};
use pipeline_orchestrator::cli::output::*;
use pipeline_orchestrator::cli::{Cli, Command};
use pipeline_orchestrator::core::config::{OrchestratorConfig, PipelineConfig};
use pipeline_orchestrator::core::{TriggerType, UnresolvedReferencePolicy};
use pipeline_orchestrator::execution::{
    CancelSignal, EngineOptions, ExecutionEngine, FilePipelineSource, JobMonitor, Scheduler,
};
use pipeline_orchestrator::plugin::{register_builtin_plugins, PluginRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plugins(cmd) => list_plugins(cmd).await?,
        Command::Schedule(cmd) => run_scheduler(cmd).await?,
    }

    Ok(())
}

async fn builtin_registry() -> Result<Arc<PluginRegistry>> {
    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry)
        .await
        .context("Failed to register built-in plugins")?;
    Ok(registry)
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let pipeline = config.to_pipeline();
    let mut context = config.initial_context();
    for (key, value) in &cmd.set {
        context.insert(key.clone(), override_value(value));
        println!(
            "{} Override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let options = EngineOptions {
        unresolved_references: if cmd.strict {
            UnresolvedReferencePolicy::Fail
        } else {
            UnresolvedReferencePolicy::PassThrough
        },
    };
    let engine = ExecutionEngine::new(builtin_registry().await?)
        .with_options(options)
        .with_event_handler(|event| println!("{}", format_execution_event(&event)));

    let monitor = JobMonitor::new(1);
    let execution_id = monitor
        .record_start(None, pipeline.name.clone(), TriggerType::Manual)
        .await;

    let signal = CancelSignal::new();
    let interrupt = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping before the next step");
            interrupt.cancel();
        }
    });

    println!();
    let result = engine.execute_pipeline(&signal, &pipeline, context).await;
    match &result.error {
        None => {
            monitor
                .record_success(&execution_id, result.context.to_value())
                .await
        }
        Some(e) => monitor.record_failure(&execution_id, e.to_string()).await,
    }
    let execution = monitor.get_execution(&execution_id).await?;
    println!("\n{}", format_execution(&execution));

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result.context)?);
    }

    match result.error {
        None => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Some(e) => {
            println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn list_plugins(cmd: &PluginsCommand) -> Result<()> {
    let registry = builtin_registry().await?;
    let plugins = registry.get_all_plugins().await;

    let mut listing: Vec<(String, Vec<String>)> = plugins
        .into_iter()
        .map(|(plugin_type, by_name)| {
            let mut names: Vec<String> = by_name.into_keys().collect();
            names.sort();
            (plugin_type, names)
        })
        .collect();
    listing.sort();

    if cmd.json {
        let data: serde_json::Map<String, serde_json::Value> = listing
            .into_iter()
            .map(|(plugin_type, names)| (plugin_type, serde_json::json!(names)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Registered plugins:", INFO);
    for (plugin_type, names) in &listing {
        for name in names {
            println!("  {}.{}", style(plugin_type).dim(), style(name).bold());
        }
    }
    Ok(())
}

async fn run_scheduler(cmd: &ScheduleCommand) -> Result<()> {
    let config = OrchestratorConfig::from_file(&cmd.config)
        .context("Failed to load orchestrator config")?;

    // Relative pipeline directories are resolved against the config file
    let config_dir = Path::new(&cmd.config)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let pipeline_dir = match &config.pipeline_dir {
        Some(dir) => config_dir.join(dir),
        None => config_dir,
    };

    let engine = ExecutionEngine::new(builtin_registry().await?).with_options(EngineOptions {
        unresolved_references: config.engine.unresolved_references,
    });
    let monitor = Arc::new(JobMonitor::new(config.monitor_capacity));
    let scheduler = Scheduler::new(
        Arc::new(engine),
        monitor.clone(),
        Arc::new(FilePipelineSource::new(pipeline_dir)),
        config.scheduler.to_options(),
    );

    for job in &config.jobs {
        scheduler
            .add_job(&job.id, &job.name, &job.pipeline, &job.cron)
            .await
            .with_context(|| format!("Failed to add job '{}'", job.id))?;
        if !job.enabled {
            scheduler.disable_job(&job.id).await?;
        }
    }

    println!("{} Scheduled jobs:", INFO);
    for job in scheduler.get_jobs().await {
        println!("  {}", format_job(&job));
    }

    scheduler.start()?;
    match cmd.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }
    println!("\n{} Stopping scheduler...", INFO);
    scheduler.stop().await;

    let recent = monitor.get_recent_executions(10).await;
    if recent.is_empty() {
        println!("{} No executions recorded", INFO);
    } else {
        println!("{} Recent executions:", INFO);
        for execution in &recent {
            println!("  {}", format_execution(execution));
        }
    }
    println!("{} {}", INFO, format_statistics(&monitor.get_statistics().await));

    if let Some(path) = &cmd.export {
        let bytes = monitor.export_to_json().await?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write export to {}", path))?;
        println!("{} Exported executions to {}", CHECK, style(path).bold());
    }

    Ok(())
}
