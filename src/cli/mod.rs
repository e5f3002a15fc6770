//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PluginsCommand, RunCommand, ScheduleCommand, ValidateCommand};
use std::ffi::OsString;

/// Plugin-driven pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "orchestrator")]
#[command(version = "0.1.0")]
#[command(about = "Run plugin pipelines once or on a cron schedule", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline once
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// List the registered plugins
    Plugins(PluginsCommand),

    /// Run the cron scheduler from an orchestrator config
    Schedule(ScheduleCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
