//! Core domain models
//!
//! This module defines the data structures threaded through a run:
//! pipelines and their steps, the accumulating context, and execution state.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod state;
pub mod template;

pub use context::*;
pub use pipeline::*;
pub use state::*;
pub use template::{TemplateResolver, UnresolvedReferencePolicy};
