use super::value::OptionValue;
use crate::error::{Result, UniverseError};
use crate::merge::{child_path, merge_value, MergeHooks, Mergeable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under which an attribute declares its automatic broadcast behavior.
pub const AUTO_OPTION_KEY: &str = "posbus_auto";

/// Options of an attribute instance or type.
///
/// Only `posbus_auto` is interpreted by the core; every other key is kept
/// verbatim in `extra` and merged generically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeOptions {
    #[serde(rename = "posbus_auto", default, skip_serializing_if = "Option::is_none")]
    pub posbus_auto: Option<AutoOption>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, OptionValue>,
}

impl AttributeOptions {
    /// Validates raw JSON options. Anything that is not an object, or whose
    /// `posbus_auto` entry is malformed, is rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(UniverseError::Validation(
                "attribute options must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| UniverseError::Validation(format!("invalid attribute options: {e}")))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn auto(&self) -> Option<&AutoOption> {
        self.posbus_auto.as_ref()
    }
}

impl Mergeable for AttributeOptions {
    fn is_zero(&self) -> bool {
        self.posbus_auto.is_none() && self.extra.is_empty()
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        Self {
            posbus_auto: merge_value(
                &self.posbus_auto,
                &default.posbus_auto,
                &child_path(path, AUTO_OPTION_KEY),
                hooks,
            ),
            extra: self.extra.merge_fields(&default.extra, path, hooks),
        }
    }
}

/// Where an auto notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoScope {
    /// The session of the user the attribute belongs to
    User,
    /// Sessions attached to the owning object only
    Object,
    /// Every session in the owning object's world
    World,
}

/// Client-side consumer of an auto notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AutoDestination {
    React,
}

impl TryFrom<u8> for AutoDestination {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(AutoDestination::React),
            other => Err(format!("unsupported send_to destination: {other}")),
        }
    }
}

impl From<AutoDestination> for u8 {
    fn from(value: AutoDestination) -> Self {
        match value {
            AutoDestination::React => 1,
        }
    }
}

/// Declared automatic broadcast behavior of an attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoOption {
    #[serde(default)]
    pub scope: Vec<AutoScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to: Option<AutoDestination>,
}

impl Mergeable for AutoScope {
    fn is_zero(&self) -> bool {
        false
    }
}

impl Mergeable for AutoDestination {
    fn is_zero(&self) -> bool {
        false
    }
}

impl Mergeable for AutoOption {
    fn is_zero(&self) -> bool {
        self.scope.is_empty() && self.topic.is_none() && self.send_to.is_none()
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        Self {
            scope: merge_value(&self.scope, &default.scope, &child_path(path, "scope"), hooks),
            topic: merge_value(&self.topic, &default.topic, &child_path(path, "topic"), hooks),
            send_to: merge_value(&self.send_to, &default.send_to, &child_path(path, "send_to"), hooks),
        }
    }
}

/// Value half of an attribute payload: always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeValue(pub serde_json::Map<String, serde_json::Value>);

impl AttributeValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(UniverseError::Validation(format!(
                "attribute value must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn into_inner(self) -> serde_json::Map<String, serde_json::Value> {
        self.0
    }
}

/// Stored unit of an attribute: an optional value plus optional instance
/// options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributePayload {
    #[serde(default)]
    pub value: Option<AttributeValue>,
    #[serde(default)]
    pub options: Option<AttributeOptions>,
}

impl AttributePayload {
    pub fn with_value(value: AttributeValue) -> Self {
        Self {
            value: Some(value),
            options: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_option_parses_from_raw_options() {
        let options = AttributeOptions::from_json(json!({
            "posbus_auto": {"scope": ["object", "world"], "send_to": 1},
            "permissions": {"read": "any"}
        }))
        .unwrap();

        let auto = options.auto().expect("auto option");
        assert_eq!(auto.scope, vec![AutoScope::Object, AutoScope::World]);
        assert_eq!(auto.send_to, Some(AutoDestination::React));
        assert!(options.extra.contains_key("permissions"));
    }

    #[test]
    fn test_malformed_options_are_rejected() {
        assert!(AttributeOptions::from_json(json!([1, 2])).is_err());
        assert!(AttributeOptions::from_json(json!({"posbus_auto": {"scope": ["galaxy"]}})).is_err());
        assert!(AttributeOptions::from_json(json!({"posbus_auto": {"send_to": 9}})).is_err());
    }

    #[test]
    fn test_instance_auto_scope_overrides_type_default() {
        let defaults = AttributeOptions::from_json(json!({
            "posbus_auto": {"scope": ["world"], "topic": "skybox"},
            "render": {"quality": "high", "hdr": true}
        }))
        .unwrap();
        let instance = AttributeOptions::from_json(json!({
            "posbus_auto": {"scope": ["user"]},
            "render": {"quality": "low"}
        }))
        .unwrap();

        let merged = crate::merge::merge(Some(&instance), Some(&defaults), &MergeHooks::default())
            .unwrap();
        let auto = merged.auto().unwrap();
        assert_eq!(auto.scope, vec![AutoScope::User]);
        assert_eq!(auto.topic.as_deref(), Some("skybox"));
        assert_eq!(
            serde_json::Value::from(merged.extra["render"].clone()),
            json!({"quality": "low", "hdr": true})
        );
    }

    #[test]
    fn test_attribute_value_must_be_object() {
        assert!(AttributeValue::from_json(json!({"x": 1})).is_ok());
        assert!(matches!(
            AttributeValue::from_json(json!("x")),
            Err(UniverseError::Validation(_))
        ));
    }
}
