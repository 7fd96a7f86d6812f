use super::value::OptionValue;
use crate::error::{Result, UniverseError};
use crate::merge::{child_path, merge_value, MergeHooks, Mergeable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which client layers render an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum VisibleType {
    Invisible,
    React,
    Unity,
    ReactUnity,
}

impl TryFrom<u8> for VisibleType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0b00 => Ok(VisibleType::Invisible),
            0b01 => Ok(VisibleType::React),
            0b10 => Ok(VisibleType::Unity),
            0b11 => Ok(VisibleType::ReactUnity),
            other => Err(format!("invalid visibility: {other}")),
        }
    }
}

impl From<VisibleType> for u8 {
    fn from(value: VisibleType) -> Self {
        match value {
            VisibleType::Invisible => 0b00,
            VisibleType::React => 0b01,
            VisibleType::Unity => 0b10,
            VisibleType::ReactUnity => 0b11,
        }
    }
}

impl Mergeable for VisibleType {
    fn is_zero(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildPlacement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, OptionValue>>,
}

impl Mergeable for ChildPlacement {
    fn is_zero(&self) -> bool {
        self.algo.is_none() && self.options.is_none()
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        Self {
            algo: merge_value(&self.algo, &default.algo, &child_path(path, "algo"), hooks),
            options: merge_value(&self.options, &default.options, &child_path(path, "options"), hooks),
        }
    }
}

/// Options of an object instance or object type.
///
/// Every field is optional; an absent field falls back to the object type's
/// value when effective options are computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_2d_options: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_3d_options: Option<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_templates: Option<BTreeMap<String, OptionValue>>,
    /// Placement of children, keyed by child object type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_placement: Option<BTreeMap<Uuid, ChildPlacement>>,
    /// Object types that may be created below this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_subobjects: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tiles: Option<Vec<OptionValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infoui_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<VisibleType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_plugins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subs: Option<BTreeMap<String, OptionValue>>,
}

impl ObjectOptions {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(UniverseError::Validation(
                "object options must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| UniverseError::Validation(format!("invalid object options: {e}")))
    }
}

impl Mergeable for ObjectOptions {
    fn is_zero(&self) -> bool {
        *self == ObjectOptions::default()
    }

    fn merge_fields(&self, d: &Self, path: &str, hooks: &MergeHooks) -> Self {
        macro_rules! field {
            ($name:ident) => {
                merge_value(&self.$name, &d.$name, &child_path(path, stringify!($name)), hooks)
            };
        }

        Self {
            asset_2d_options: field!(asset_2d_options),
            asset_3d_options: field!(asset_3d_options),
            frame_templates: field!(frame_templates),
            child_placement: field!(child_placement),
            allowed_subobjects: field!(allowed_subobjects),
            default_tiles: field!(default_tiles),
            infoui_id: field!(infoui_id),
            minimap: field!(minimap),
            visible: field!(visible),
            editable: field!(editable),
            private: field!(private),
            dashboard_plugins: field!(dashboard_plugins),
            subs: field!(subs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;
    use serde_json::json;

    #[test]
    fn test_allowed_subobjects_accumulate_without_duplicates() {
        let shared = Uuid::new_v4();
        let own = Uuid::new_v4();
        let inherited = Uuid::new_v4();

        let instance = ObjectOptions {
            allowed_subobjects: Some(vec![own, shared]),
            dashboard_plugins: Some(vec!["miro".into()]),
            ..Default::default()
        };
        let defaults = ObjectOptions {
            allowed_subobjects: Some(vec![shared, inherited]),
            dashboard_plugins: Some(vec!["miro".into(), "gdrive".into()]),
            editable: Some(true),
            ..Default::default()
        };

        let merged = merge(Some(&instance), Some(&defaults), &MergeHooks::object_options()).unwrap();
        assert_eq!(merged.allowed_subobjects, Some(vec![own, shared, inherited]));
        assert_eq!(
            merged.dashboard_plugins,
            Some(vec!["miro".to_string(), "gdrive".to_string()])
        );
        assert_eq!(merged.editable, Some(true));
    }

    #[test]
    fn test_explicit_false_overrides_default_true() {
        let instance = ObjectOptions {
            private: Some(false),
            ..Default::default()
        };
        let defaults = ObjectOptions {
            private: Some(true),
            ..Default::default()
        };
        let merged = merge(Some(&instance), Some(&defaults), &MergeHooks::object_options()).unwrap();
        assert_eq!(merged.private, Some(false));
    }

    #[test]
    fn test_subs_merge_per_key() {
        let instance = ObjectOptions::from_json(json!({"subs": {"skybox": "night"}})).unwrap();
        let defaults =
            ObjectOptions::from_json(json!({"subs": {"skybox": "day", "music": "calm"}, "visible": 3}))
                .unwrap();
        let merged = merge(Some(&instance), Some(&defaults), &MergeHooks::object_options()).unwrap();
        let subs = merged.subs.unwrap();
        assert_eq!(subs["skybox"], OptionValue::String("night".into()));
        assert_eq!(subs["music"], OptionValue::String("calm".into()));
        assert_eq!(merged.visible, Some(VisibleType::ReactUnity));
    }

    #[test]
    fn test_invalid_visibility_rejected() {
        assert!(ObjectOptions::from_json(json!({"visible": 7})).is_err());
    }
}
