//! Core configuration and defaults.

use crate::ids::{ObjectId, PluginId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tunables of the object tree and its queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// World new connections are admitted into
    pub spawn_world_id: ObjectId,

    /// Name given to the spawn world when it has to be created
    pub spawn_world_name: String,

    /// Plugin that owns system attributes such as `last_known_position`
    pub system_plugin_id: PluginId,

    /// Capacity of each object's broadcast queue
    pub pipeline_capacity: usize,

    /// Capacity of each session's outbound queue
    pub session_queue_capacity: usize,

    /// Capacity of each attribute change notifier queue
    pub notifier_capacity: usize,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            spawn_world_id: ObjectId(Uuid::from_u128(0xd83670c7_a120_47a4_892d_f9ec75604f74)),
            spawn_world_name: "Spawn".to_string(),
            system_plugin_id: PluginId(Uuid::from_u128(0xf0f0f0f0_0f0f_4ff0_af0f_f0f0f0f0f0f0)),
            pipeline_capacity: 100,
            session_queue_capacity: 10,
            notifier_capacity: 64,
        }
    }
}
