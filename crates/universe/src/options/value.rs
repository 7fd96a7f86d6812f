use crate::merge::{MergeHooks, Mergeable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A free-form option value.
///
/// Options arrive as arbitrary JSON from storage and admin callers. They are
/// converted into this closed variant once, at the boundary, so the merge
/// engine only ever sees these shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum OptionValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<OptionValue>),
    Map(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, OptionValue>> {
        match self {
            OptionValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl Mergeable for OptionValue {
    fn is_zero(&self) -> bool {
        match self {
            OptionValue::Null => true,
            OptionValue::List(l) => l.is_empty(),
            OptionValue::Map(m) => m.is_empty(),
            OptionValue::Bool(_)
            | OptionValue::Int(_)
            | OptionValue::Float(_)
            | OptionValue::String(_) => false,
        }
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        match (self, default) {
            (OptionValue::Map(o), OptionValue::Map(d)) => {
                OptionValue::Map(o.merge_fields(d, path, hooks))
            }
            _ => self.clone(),
        }
    }

    fn concat(&self, default: &Self, unique: bool) -> Option<Self> {
        match (self, default) {
            (OptionValue::List(o), OptionValue::List(d)) => o.concat(d, unique).map(OptionValue::List),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for OptionValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => OptionValue::Null,
            serde_json::Value::Bool(b) => OptionValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => OptionValue::Int(i),
                None => OptionValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => OptionValue::String(s),
            serde_json::Value::Array(items) => {
                OptionValue::List(items.into_iter().map(OptionValue::from).collect())
            }
            serde_json::Value::Object(map) => OptionValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, OptionValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<OptionValue> for serde_json::Value {
    fn from(value: OptionValue) -> Self {
        match value {
            OptionValue::Null => serde_json::Value::Null,
            OptionValue::Bool(b) => serde_json::Value::Bool(b),
            OptionValue::Int(i) => serde_json::Value::from(i),
            OptionValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            OptionValue::String(s) => serde_json::Value::String(s),
            OptionValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            OptionValue::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_shape() {
        let value = OptionValue::from(json!({"a": [1, 2.5, "x"], "b": null, "c": true}));
        let map = value.as_map().expect("map");
        assert_eq!(
            map["a"],
            OptionValue::List(vec![
                OptionValue::Int(1),
                OptionValue::Float(2.5),
                OptionValue::String("x".into())
            ])
        );
        assert!(map["b"].is_zero());
        assert_eq!(map["c"].as_bool(), Some(true));
    }

    #[test]
    fn test_nested_maps_merge_per_key() {
        let o = OptionValue::from(json!({"frame": {"w": 2}, "kind": "video"}));
        let d = OptionValue::from(json!({"frame": {"w": 1, "h": 1}, "kind": "image"}));
        let merged = crate::merge::merge(Some(&o), Some(&d), &MergeHooks::default()).unwrap();
        assert_eq!(
            serde_json::Value::from(merged),
            json!({"frame": {"w": 2, "h": 1}, "kind": "video"})
        );
    }

    #[test]
    fn test_explicit_false_and_zero_keep_instance_value() {
        let o = OptionValue::from(json!({"hdr": false, "fps": 0, "title": "", "extra": null}));
        let d = OptionValue::from(json!({"hdr": true, "fps": 30, "title": "Lobby", "extra": {"a": 1}}));
        let merged = crate::merge::merge(Some(&o), Some(&d), &MergeHooks::default()).unwrap();
        assert_eq!(
            serde_json::Value::from(merged),
            json!({"hdr": false, "fps": 0, "title": "", "extra": {"a": 1}})
        );
    }

    #[test]
    fn test_untagged_deserialize_prefers_int() {
        let value: OptionValue = serde_json::from_str("7").unwrap();
        assert_eq!(value, OptionValue::Int(7));
    }
}
