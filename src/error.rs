//! Error taxonomy for the orchestration core

use std::fmt;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What kind of thing a lookup or registration was about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Plugin,
    Job,
    Execution,
    Pipeline,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Plugin => "plugin",
            ResourceKind::Job => "job",
            ResourceKind::Execution => "execution",
            ResourceKind::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// Broad category of an [`OrchestratorError`], ignoring step tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Duplicate,
    Validation,
    Execution,
    Scheduling,
    Cancelled,
    Serialization,
    Io,
}

/// Errors produced by the registry, engine, scheduler and monitor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// Malformed pipeline or step definition
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} already registered: {name}")]
    Duplicate { kind: ResourceKind, name: String },

    /// A plugin rejected its step configuration
    #[error("validation failed: {0}")]
    Validation(String),

    /// A plugin failed while running
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    Scheduling { expression: String, reason: String },

    /// A step-level failure tagged with where it happened
    #[error("pipeline '{pipeline}' step '{step}': {source}")]
    Step {
        pipeline: String,
        step: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("pipeline '{pipeline}' cancelled before step '{step}'")]
    Cancelled { pipeline: String, step: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl OrchestratorError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        OrchestratorError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn duplicate(kind: ResourceKind, name: impl Into<String>) -> Self {
        OrchestratorError::Duplicate {
            kind,
            name: name.into(),
        }
    }

    /// Tag an error with the pipeline and step it came from
    pub fn at_step(self, pipeline: impl Into<String>, step: impl Into<String>) -> Self {
        OrchestratorError::Step {
            pipeline: pipeline.into(),
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The untagged error underneath any step tagging
    pub fn root(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the step this error is tagged with, if any
    pub fn step_name(&self) -> Option<&str> {
        match self {
            OrchestratorError::Step { step, .. } | OrchestratorError::Cancelled { step, .. } => {
                Some(step.as_str())
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Step { source, .. } => source.kind(),
            OrchestratorError::Configuration(_) => ErrorKind::Configuration,
            OrchestratorError::NotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::Duplicate { .. } => ErrorKind::Duplicate,
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::Execution(_) => ErrorKind::Execution,
            OrchestratorError::Scheduling { .. } => ErrorKind::Scheduling,
            OrchestratorError::Cancelled { .. } => ErrorKind::Cancelled,
            OrchestratorError::Serialization(_) => ErrorKind::Serialization,
            OrchestratorError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(e: serde_yaml::Error) -> Self {
        OrchestratorError::Configuration(e.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Io(e.to_string())
    }
}
