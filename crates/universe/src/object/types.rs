use crate::ids::{AssetId, ObjectTypeId};
use crate::options::ObjectOptions;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Asset format reported when the 3D asset does not say otherwise.
pub const ASSET_FORMAT_ADDRESSABLE: u32 = 0;

/// Shared definition of a kind of object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: ObjectTypeId,
    pub name: String,
    /// Asset used by instances that have none of their own
    #[serde(default)]
    pub asset_3d_id: Option<AssetId>,
    /// Defaults every instance's options are merged over
    #[serde(default)]
    pub options: Option<ObjectOptions>,
}

#[derive(Debug, Default)]
pub struct ObjectTypes {
    types: DashMap<ObjectTypeId, ObjectType>,
}

impl ObjectTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, object_type: ObjectType) {
        self.types.insert(object_type.id, object_type);
    }

    pub fn get(&self, id: &ObjectTypeId) -> Option<ObjectType> {
        self.types.get(id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
