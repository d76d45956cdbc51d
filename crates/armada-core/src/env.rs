//! Environment variable values and overlay merging.
//!
//! YAML composition makes it convenient to build variable values out of
//! nested lists (anchors merged into sequences); any list value is deep
//! flattened into a single space-separated string. Overlays merge with
//! last-wins semantics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single environment variable value as it appears in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// String value.
    Text(String),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Nested list, flattened to a space-separated string.
    List(Vec<EnvValue>),
}

impl EnvValue {
    /// Flattens the value to the string that will be injected.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => x.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items
                .iter()
                .map(EnvValue::flatten)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// An ordered map of raw environment values.
pub type EnvMap = BTreeMap<String, EnvValue>;

/// Merges overlays into a flat string map; later layers win.
pub fn merge_layers(layers: &[&EnvMap]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.flatten());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_scalars() {
        assert_eq!(EnvValue::Text("x".into()).flatten(), "x");
        assert_eq!(EnvValue::Int(42).flatten(), "42");
        assert_eq!(EnvValue::Bool(true).flatten(), "true");
    }

    #[test]
    fn test_flatten_nested_lists() {
        let value: EnvValue = serde_yaml::from_str("[a, [b, c], d]").unwrap();
        assert_eq!(value.flatten(), "a b c d");
    }

    #[test]
    fn test_last_layer_wins() {
        let mut base = EnvMap::new();
        base.insert("A".into(), "1".into());
        base.insert("B".into(), "2".into());
        let mut over = EnvMap::new();
        over.insert("B".into(), "3".into());

        let merged = merge_layers(&[&base, &over]);
        assert_eq!(merged.get("A").map(String::as_str), Some("1"));
        assert_eq!(merged.get("B").map(String::as_str), Some("3"));
    }
}
