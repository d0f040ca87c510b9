//! # Parameter Hash: the Interpreters' Shared Scratchpad
//!
//! Both the request and response interpreters read and write a single
//! container: a typed mapping from `(name, array index)` to a [`Value`].
//! Scalars live at index `0`; array-valued leaves (written inside a `FOR`
//! body with `array_index` set to the loop counter) use the counter's
//! current value as the index.
//!
//! The upstream C library treats this container as opaque, exposing only
//! get/set/default/enumerate/construct/free. This crate gives it a concrete,
//! safe representation: a `HashMap` keyed by `(String, i64)`.

use std::collections::HashMap;
use urfa_common::Value;

/// A typed `(name, index) -> Value` mapping.
#[derive(Debug, Clone, Default)]
pub struct ParamHash {
    entries: HashMap<(String, i64), Value>,
}

impl ParamHash {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Looks up `name[index]`.
    pub fn get(&self, name: &str, index: i64) -> Option<&Value> {
        self.entries.get(&(name.to_string(), index))
    }

    /// Looks up `name[index]`, falling back to `default` if absent.
    pub fn get_or(&self, name: &str, index: i64, default: Value) -> Value {
        self.get(name, index).cloned().unwrap_or(default)
    }

    /// Sets `name[index] = value`, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, index: i64, value: Value) -> Option<Value> {
        self.entries.insert((name.into(), index), value)
    }

    /// Removes `name[index]`, returning its previous value if any.
    pub fn remove(&mut self, name: &str, index: i64) -> Option<Value> {
        self.entries.remove(&(name.to_string(), index))
    }

    pub fn contains(&self, name: &str, index: i64) -> bool {
        self.entries.contains_key(&(name.to_string(), index))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Enumerates entries for debug dumps. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, i64), &Value)> {
        self.entries.iter()
    }

    /// Human-readable dump, used by the call orchestrator's debug stream.
    pub fn dump(&self, out: &mut impl std::io::Write, header: &str) -> std::io::Result<()> {
        writeln!(out, "{header}")?;
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for ((name, index), value) in entries {
            writeln!(out, "  {name}[{index}] = {value}")?;
        }
        Ok(())
    }

    /// Renders this hash as a JSON object, for the `urfa-cli` `--json` flag.
    /// Scalars (`index == 0` and no sibling at a non-zero index) serialize as
    /// `"name": value`; array-valued slots serialize as `"name": [v0, v1, ...]`.
    pub fn to_json(&self) -> serde_json::Value {
        use std::collections::BTreeMap;
        let mut grouped: BTreeMap<&str, BTreeMap<i64, &Value>> = BTreeMap::new();
        for ((name, index), value) in &self.entries {
            grouped.entry(name.as_str()).or_default().insert(*index, value);
        }

        let mut obj = serde_json::Map::new();
        for (name, by_index) in grouped {
            if by_index.len() == 1 && by_index.contains_key(&0) {
                let value = by_index[&0];
                obj.insert(name.to_string(), serde_json::to_value(value).unwrap());
            } else {
                let arr: Vec<serde_json::Value> = by_index
                    .values()
                    .map(|v| serde_json::to_value(v).unwrap())
                    .collect();
                obj.insert(name.to_string(), serde_json::Value::Array(arr));
            }
        }
        serde_json::Value::Object(obj)
    }
}
