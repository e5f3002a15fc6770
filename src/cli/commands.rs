//! CLI command definitions

use clap::Args;
use serde_json::Value;

/// Run a pipeline once
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Context overrides (key=value), applied on top of the pipeline's variables
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Fail steps whose templates reference missing context values
    #[arg(long)]
    pub strict: bool,

    /// Print the final context as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List the registered plugins
#[derive(Debug, Args, Clone)]
pub struct PluginsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run the scheduler
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Path to orchestrator YAML config
    #[arg(short, long)]
    pub config: String,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Write the monitor snapshot to this file on shutdown
    #[arg(long)]
    pub export: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Interpret an override value as JSON when it parses, otherwise as a string
pub fn override_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=b").unwrap(), ("a".to_string(), "b".to_string()));
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert_eq!(parse_key_value("a=").unwrap(), ("a".to_string(), String::new()));
        assert!(parse_key_value("=b").is_err());
        assert!(parse_key_value("ab").is_err());
    }

    #[test]
    fn test_override_value() {
        assert_eq!(override_value("10"), json!(10));
        assert_eq!(override_value("true"), json!(true));
        assert_eq!(override_value("[1,2]"), json!([1, 2]));
        assert_eq!(override_value("eu-west"), json!("eu-west"));
    }
}
