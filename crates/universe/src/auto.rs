//! Automatic broadcast of attribute changes.
//!
//! An attribute whose effective options carry a `posbus_auto` entry is
//! announced to clients whenever it changes. The handlers here turn one
//! [`AttributeChange`] into at most one `AttributeValueChanged` frame and hand
//! it to every declared scope. A failing scope is recorded and the remaining
//! scopes are still served.

use crate::attributes::{AttributeChange, AttributeOwner};
use crate::error::DeliveryErrors;
use crate::ids::UserId;
use crate::node::Node;
use crate::object::Object;
use crate::options::{AutoOption, AutoScope};
use crate::session::Session;
use crate::world::World;
use bytes::Bytes;
use posbus::{AttributeChangeType, AttributeValueChanged, Message};
use std::sync::Arc;

/// Builds the frame announcing `change`, if its attribute declares auto
/// behavior.
///
/// The topic defaults to the plugin id when none is configured.
pub fn change_message(change: &AttributeChange) -> Option<(AutoOption, Bytes)> {
    let option = change.effective_options.as_ref()?.auto()?.clone();
    let topic = option
        .topic
        .clone()
        .unwrap_or_else(|| change.attribute_id.plugin_id.to_string());
    let value = match change.change_type {
        AttributeChangeType::Changed => change.value.clone().map(|v| v.0),
        AttributeChangeType::Removed => None,
    };
    let frame = AttributeValueChanged {
        topic,
        plugin_id: change.attribute_id.plugin_id.0,
        attribute_name: change.attribute_id.name.clone(),
        change_type: change.change_type.as_str().to_string(),
        value,
        target_id: change.owner.target_id(),
    }
    .to_frame();
    Some((option, frame))
}

/// Delivers a change of an object-owned attribute.
///
/// `User` goes to the session of the object's owner, `Object` to the
/// sessions attached to `object`, `World` to every object of its world.
pub async fn dispatch_object_change(object: &Arc<Object>, change: &AttributeChange) -> DeliveryErrors {
    let mut errors = DeliveryErrors::new();
    let Some((option, frame)) = change_message(change) else {
        return errors;
    };

    for scope in &option.scope {
        match scope {
            AutoScope::User => {
                let owner_id = object.owner_id().await;
                send_to_user(object.ctx().session(&owner_id), &owner_id, &frame, &mut errors).await;
            }
            AutoScope::Object => {
                object.send(frame.clone(), false).await;
            }
            AutoScope::World => match object.world() {
                Some(world) => world.broadcast(frame.clone()).await,
                None => errors.push(format!("world {} is gone", object.world_id())),
            },
        }
    }
    errors
}

/// Delivers a change of an attribute held by one of the node-level stores.
///
/// Users are looked up in the session directory, objects across every
/// world of `node`.
pub async fn dispatch_node_change(node: &Node, change: &AttributeChange) -> DeliveryErrors {
    let mut errors = DeliveryErrors::new();
    let Some((option, frame)) = change_message(change) else {
        return errors;
    };
    let ctx = node.ctx();

    let user_id = match change.owner {
        AttributeOwner::User(user_id) | AttributeOwner::ObjectUser(_, user_id) => Some(user_id),
        AttributeOwner::UserUser(_, target) => Some(target),
        AttributeOwner::Object(_) | AttributeOwner::Node => None,
    };
    let object = match change.owner {
        AttributeOwner::ObjectUser(object_id, _) | AttributeOwner::Object(object_id) => {
            node.get_object_from_all_objects(&object_id)
        }
        _ => None,
    };

    for scope in &option.scope {
        match scope {
            AutoScope::User => match user_id {
                Some(user_id) => send_to_user(ctx.session(&user_id), &user_id, &frame, &mut errors).await,
                None => errors.push(format!("{} has no user to notify", change.owner)),
            },
            AutoScope::Object => match &object {
                Some(object) => {
                    object.send(frame.clone(), false).await;
                }
                None => errors.push(format!("{} has no live object", change.owner)),
            },
            AutoScope::World => {
                let worlds: Vec<Arc<World>> = match (&object, user_id, change.owner) {
                    (Some(object), _, _) => object.world().into_iter().collect(),
                    (None, Some(user_id), _) => match ctx.session(&user_id) {
                        Some(session) => session.world().await.into_iter().collect(),
                        None => Vec::new(),
                    },
                    (None, None, AttributeOwner::Node) => node.worlds(),
                    _ => Vec::new(),
                };
                if worlds.is_empty() {
                    errors.push(format!("{} is not in any world", change.owner));
                }
                for world in worlds {
                    world.broadcast(frame.clone()).await;
                }
            }
        }
    }
    errors
}

async fn send_to_user(
    session: Option<Arc<Session>>,
    user_id: &UserId,
    frame: &Bytes,
    errors: &mut DeliveryErrors,
) {
    match session {
        Some(session) => {
            if let Err(e) = session.send(frame.clone()).await {
                errors.push(format!("user {user_id}: {e}"));
            }
        }
        None => errors.push(format!("user {user_id} is not connected")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AttributeId, ObjectId, PluginId};
    use crate::options::{AttributeOptions, AttributeValue};
    use serde_json::json;

    fn change(change_type: AttributeChangeType, options: serde_json::Value) -> AttributeChange {
        AttributeChange {
            owner: AttributeOwner::Object(ObjectId::new()),
            attribute_id: AttributeId::new(PluginId::new(), "state"),
            change_type,
            value: Some(AttributeValue::from_json(json!({"on": true})).unwrap()),
            effective_options: Some(AttributeOptions::from_json(options).unwrap()),
        }
    }

    #[test]
    fn test_no_message_without_auto_option() {
        let c = change(AttributeChangeType::Changed, json!({"other": 1}));
        assert!(change_message(&c).is_none());
    }

    #[test]
    fn test_topic_defaults_to_plugin_id() {
        let c = change(
            AttributeChangeType::Changed,
            json!({"posbus_auto": {"scope": ["object"]}}),
        );
        let (option, frame) = change_message(&c).unwrap();
        assert_eq!(option.scope, vec![AutoScope::Object]);

        let msg = AttributeValueChanged::from_frame(&frame).unwrap();
        assert_eq!(msg.topic, c.attribute_id.plugin_id.to_string());
        assert_eq!(msg.attribute_name, "state");
        assert_eq!(msg.change_type, "attribute_changed");
        assert_eq!(msg.target_id, c.owner.target_id());
        assert_eq!(msg.value.unwrap().get("on"), Some(&json!(true)));
    }

    #[test]
    fn test_removed_change_carries_no_value() {
        let c = change(
            AttributeChangeType::Removed,
            json!({"posbus_auto": {"scope": ["world"], "topic": "lights"}}),
        );
        let (_, frame) = change_message(&c).unwrap();
        let msg = AttributeValueChanged::from_frame(&frame).unwrap();
        assert_eq!(msg.topic, "lights");
        assert_eq!(msg.change_type, "attribute_removed");
        assert!(msg.value.is_none());
    }
}
