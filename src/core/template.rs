//! Resolution of `context.<step>.<field>` references inside step configs

use crate::core::context::Context;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static EMBEDDED_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*context\.([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("embedded reference pattern is valid")
});

static BARE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*context\.([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*$")
        .expect("bare reference pattern is valid")
});

/// What to do with a reference that points at nothing in the context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReferencePolicy {
    /// Leave the reference text in place
    #[default]
    PassThrough,
    /// Fail the step
    Fail,
}

/// Resolves references against the context accumulated so far
pub struct TemplateResolver<'a> {
    context: &'a Context,
    /// step name -> output key, for steps that already ran
    aliases: &'a HashMap<String, String>,
    unresolved: Vec<String>,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(context: &'a Context, aliases: &'a HashMap<String, String>) -> Self {
        Self {
            context,
            aliases,
            unresolved: Vec::new(),
        }
    }

    /// Resolve every reference inside `config`.
    ///
    /// References that cannot be resolved are left untouched and collected;
    /// see [`TemplateResolver::unresolved`].
    pub fn resolve_map(&mut self, config: &Map<String, Value>) -> Map<String, Value> {
        config
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve_value(value)))
            .collect()
    }

    /// References that pointed at nothing, in the order they were met
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    fn resolve_value(&mut self, value: &Value) -> Value {
        match value {
            Value::String(text) => self.resolve_string(text),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(self.resolve_map(map)),
            other => other.clone(),
        }
    }

    fn resolve_string(&mut self, text: &str) -> Value {
        // A string that is exactly one reference keeps the referenced type
        let whole = EMBEDDED_REFERENCE
            .captures(text)
            .filter(|caps| caps.get(0).map(|m| m.as_str().len()) == Some(text.trim().len()))
            .or_else(|| BARE_REFERENCE.captures(text));

        if let Some(caps) = whole {
            let path = &caps[1];
            return match self.lookup(path) {
                Some(value) => value.clone(),
                None => {
                    self.note_unresolved(path);
                    Value::String(text.to_string())
                }
            };
        }

        let mut missing = Vec::new();
        let rendered = EMBEDDED_REFERENCE.replace_all(text, |caps: &Captures| {
            let path = &caps[1];
            match self.lookup(path) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.push(path.to_string());
                    caps[0].to_string()
                }
            }
        });
        let rendered = rendered.into_owned();
        for path in missing {
            self.note_unresolved(&path);
        }
        Value::String(rendered)
    }

    /// The first segment names a completed step if one has that name,
    /// otherwise a context key directly
    fn lookup(&self, path: &str) -> Option<&'a Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        if let Some(output_key) = self.aliases.get(segments[0]) {
            segments[0] = output_key.as_str();
        }
        self.context.lookup(&segments)
    }

    fn note_unresolved(&mut self, path: &str) {
        debug!("Unresolved context reference: context.{}", path);
        self.unresolved.push(format!("context.{}", path));
    }
}
