//! Identifier types.
//!
//! Each identifier wraps a [`Uuid`] so that object, user and plugin ids cannot
//! be mixed up. All of them display as the plain UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The all-zero identifier.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of an object in the spatial tree. A world shares its id with
    /// its root object.
    ObjectId
);
define_id!(
    /// Identifier of a user account.
    UserId
);
define_id!(
    /// Identifier of one connection of a user; a reconnect gets a new one.
    SessionId
);
define_id!(
    /// Identifier of the plugin that owns an attribute type.
    PluginId
);
define_id!(ObjectTypeId);
define_id!(
    /// Identifier of a 3D asset.
    AssetId
);

/// Attribute identity: a name scoped to its owning plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeId {
    pub plugin_id: PluginId,
    pub name: String,
}

impl AttributeId {
    pub fn new(plugin_id: PluginId, name: impl Into<String>) -> Self {
        Self {
            plugin_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_parse_and_display() {
        let raw = "69e1d7f6-3130-4005-9969-31edf9af9445";
        let id: UserId = raw.parse().expect("valid uuid");
        assert_eq!(id.to_string(), raw);
        assert!("not-a-uuid".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_attribute_id_display() {
        let id = AttributeId::new(PluginId::nil(), "color");
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000/color");
    }
}
