//! Pipeline context - the accumulating result store of one run

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the namespace shared by all steps of a run
pub const GLOBAL_NAMESPACE: &str = "_global";

/// Execution context for a pipeline run
///
/// Maps string keys to arbitrary JSON values. Each step's result lands under
/// the step's output key; entries are added or replaced but never removed.
/// A context belongs to exactly one run and is never shared between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Walk a dotted path (`["a_out", "processed"]`) into the context.
    ///
    /// Objects are indexed by key, arrays by numeric segment.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.values.get(first.as_ref())?;
        for segment in rest {
            let segment = segment.as_ref();
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Read a value from the shared `_global` namespace
    pub fn global(&self, key: &str) -> Option<&Value> {
        self.values
            .get(GLOBAL_NAMESPACE)
            .and_then(Value::as_object)
            .and_then(|globals| globals.get(key))
    }

    /// Write a value into the shared `_global` namespace
    pub fn set_global(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let slot = self
            .values
            .entry(GLOBAL_NAMESPACE)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(globals) = slot {
            globals.insert(key.into(), value.into());
        }
    }

    /// Merge the delta returned by a step into this context.
    ///
    /// A `_global` object in the delta is merged key by key into the shared
    /// namespace; everything else is stored as one object under `output_key`.
    /// An `output_key` of `_global` also merges key by key, so earlier
    /// globals are never dropped.
    pub fn merge_step_output(&mut self, output_key: &str, mut delta: Context) {
        if let Some(Value::Object(globals)) = delta.values.remove(GLOBAL_NAMESPACE) {
            for (key, value) in globals {
                self.set_global(key, value);
            }
        }
        if output_key == GLOBAL_NAMESPACE {
            for (key, value) in delta.values {
                self.set_global(key, value);
            }
            return;
        }
        self.values
            .insert(output_key.to_string(), Value::Object(delta.values));
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_path() {
        let mut ctx = Context::new();
        ctx.insert("a_out", json!({"processed": "PROCESSED_x", "rows": [1, 2, 3]}));

        assert_eq!(ctx.lookup(&["a_out", "processed"]), Some(&json!("PROCESSED_x")));
        assert_eq!(ctx.lookup(&["a_out", "rows", "1"]), Some(&json!(2)));
        assert_eq!(ctx.lookup(&["a_out", "missing"]), None);
        assert_eq!(ctx.lookup::<&str>(&[]), None);
    }

    #[test]
    fn test_merge_step_output_namespaces_result() {
        let mut ctx = Context::new();
        ctx.insert("seed", 1);

        let delta: Context = [("processed", "yes")].into_iter().collect();
        ctx.merge_step_output("a_out", delta);

        assert_eq!(ctx.get("seed"), Some(&json!(1)));
        assert_eq!(ctx.get("a_out"), Some(&json!({"processed": "yes"})));
    }

    #[test]
    fn test_merge_step_output_lifts_globals() {
        let mut ctx = Context::new();
        ctx.set_global("region", "eu");

        let mut delta = Context::new();
        delta.insert(GLOBAL_NAMESPACE, json!({"batch": 7}));
        delta.insert("ok", true);
        ctx.merge_step_output("b_out", delta);

        assert_eq!(ctx.global("region"), Some(&json!("eu")));
        assert_eq!(ctx.global("batch"), Some(&json!(7)));
        assert_eq!(ctx.get("b_out"), Some(&json!({"ok": true})));
    }

    #[test]
    fn test_merge_into_global_output_key_keeps_existing_globals() {
        let mut ctx = Context::new();
        ctx.set_global("region", "eu");

        let delta: Context = [("ok", true)].into_iter().collect();
        ctx.merge_step_output(GLOBAL_NAMESPACE, delta);

        assert_eq!(ctx.global("region"), Some(&json!("eu")));
        assert_eq!(ctx.global("ok"), Some(&json!(true)));
    }

    #[test]
    fn test_set_global_replaces_non_object_namespace() {
        let mut ctx = Context::new();
        ctx.insert(GLOBAL_NAMESPACE, "oops");
        ctx.set_global("k", "v");
        assert_eq!(ctx.global("k"), Some(&json!("v")));
    }
}
