use super::*;
use crate::attributes::AttributeType;
use crate::config::UniverseConfig;
use crate::ids::{AttributeId, PluginId, SessionId};
use crate::options::{AttributeOptions, AttributePayload, AttributeValue};
use crate::session::{SessionOutlet, UserProfile};
use posbus::{message_type, AttributeValueChanged, MsgType};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

fn record(parent_id: Option<ObjectId>, name: &str) -> ObjectRecord {
    ObjectRecord {
        id: ObjectId::new(),
        parent_id,
        owner_id: UserId::nil(),
        object_type_id: ObjectTypeId::nil(),
        name: name.to_string(),
        asset_3d_id: None,
        options: None,
        transform: None,
    }
}

fn world() -> Arc<World> {
    let ctx = UniverseContext::in_memory(UniverseConfig::default());
    World::new(&record(None, "world"), ctx)
}

fn collect(mut outlet: SessionOutlet) -> mpsc::UnboundedReceiver<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(frames) = outlet.recv().await {
            for frame in frames {
                if tx.send(frame).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

/// The object only holds the session weakly; keep the returned handle alive.
async fn attached_session(object: &Arc<Object>) -> (Arc<Session>, mpsc::UnboundedReceiver<Bytes>) {
    let (session, outlet) = Session::new(UserId::new(), SessionId::new(), UserProfile::guest(), 10);
    session.release_send_buffer().await;
    object.attach_session(&session).await;
    (session, collect(outlet))
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame in time")
        .expect("outlet open")
}

#[tokio::test]
async fn test_remove_child_keeps_detached_subtree_intact() {
    let world = world();
    let r = world.root();
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    let b = world
        .create_object(&record(Some(a.id()), "b"), false)
        .await
        .unwrap();

    let removed = r.remove_child(&a.id(), false, false).await.unwrap();
    assert!(removed.is_some_and(|o| Arc::ptr_eq(&o, &a)));

    assert!(a.parent().await.is_none());
    assert!(Arc::ptr_eq(&b.parent().await.unwrap(), &a));
    assert!(r.get_object(&a.id(), true).await.is_none());
    assert!(r.get_object(&b.id(), true).await.is_none());
    assert!(world.get_object(&a.id()).is_none());
    assert!(world.get_object(&b.id()).is_none());
    assert_eq!(world.object_count(), 1);
}

#[tokio::test]
async fn test_add_child_rejects_cycles_self_and_foreign_worlds() {
    let world = world();
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    let b = world
        .create_object(&record(Some(a.id()), "b"), false)
        .await
        .unwrap();

    assert!(matches!(
        a.add_child(&a, false).await,
        Err(UniverseError::Validation(_))
    ));
    assert!(matches!(
        b.add_child(&a, false).await,
        Err(UniverseError::Validation(_))
    ));
    assert!(matches!(
        b.add_child(world.root(), false).await,
        Err(UniverseError::Validation(_))
    ));

    let other = self::world();
    assert!(matches!(
        other.root().add_child(&a, false).await,
        Err(UniverseError::Validation(_))
    ));

    // failed calls left the tree as it was
    assert!(Arc::ptr_eq(&b.parent().await.unwrap(), &a));
    assert!(Arc::ptr_eq(&a.parent().await.unwrap(), world.root()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_concurrent_moves_keep_tree_acyclic() {
    for _ in 0..50 {
        let world = world();
        let a = world.create_object(&record(None, "a"), false).await.unwrap();
        let b = world.create_object(&record(None, "b"), false).await.unwrap();

        let (a1, b1) = (Arc::clone(&a), Arc::clone(&b));
        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        let first = tokio::spawn(async move { a1.add_child(&b1, false).await });
        let second = tokio::spawn(async move { b2.add_child(&a2, false).await });
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(world.root().get_object(&a.id(), true).await.is_some());
        assert!(world.root().get_object(&b.id(), true).await.is_some());
        for object in [&a, &b] {
            let mut depth = 0;
            let mut cursor = object.parent().await;
            while let Some(ancestor) = cursor {
                depth += 1;
                assert!(depth <= 3, "ancestor chain of {} loops", object.id());
                cursor = ancestor.parent().await;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_of_one_child_leave_single_parent() {
    for _ in 0..50 {
        let world = world();
        let p1 = world.create_object(&record(None, "p1"), false).await.unwrap();
        let p2 = world.create_object(&record(None, "p2"), false).await.unwrap();
        let c = world.create_object(&record(None, "c"), false).await.unwrap();

        let (to_p1, c1) = (Arc::clone(&p1), Arc::clone(&c));
        let (to_p2, c2) = (Arc::clone(&p2), Arc::clone(&c));
        let first = tokio::spawn(async move { to_p1.add_child(&c1, false).await });
        let second = tokio::spawn(async move { to_p2.add_child(&c2, false).await });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let in_p1 = p1.get_object(&c.id(), false).await.is_some();
        let in_p2 = p2.get_object(&c.id(), false).await.is_some();
        assert!(in_p1 ^ in_p2);
        let parent = c.parent().await.unwrap();
        assert!(Arc::ptr_eq(&parent, if in_p1 { &p1 } else { &p2 }));
        assert!(world.root().get_object(&c.id(), false).await.is_none());
    }
}

fn stored_world() -> (Arc<World>, Arc<crate::attributes::InMemoryStore>) {
    let store = Arc::new(crate::attributes::InMemoryStore::new());
    let ctx = UniverseContext::builder(UniverseConfig::default())
        .store(Arc::clone(&store))
        .build();
    (World::new(&record(None, "world"), ctx), store)
}

#[tokio::test]
async fn test_persisted_detach_deletes_stored_subtree() {
    let (world, store) = stored_world();
    let a = world.create_object(&record(None, "a"), true).await.unwrap();
    let b = world
        .create_object(&record(Some(a.id()), "b"), true)
        .await
        .unwrap();
    let c = world
        .create_object(&record(Some(b.id()), "c"), true)
        .await
        .unwrap();
    let kept = world.create_object(&record(None, "kept"), true).await.unwrap();
    assert_eq!(store.object_count(), 4);

    world.root().remove_child(&a.id(), false, true).await.unwrap();
    for gone in [&a, &b, &c] {
        assert!(store.object(&gone.id()).is_none());
    }
    assert!(store.object(&kept.id()).is_some());
    // the detached subtree itself is still linked in memory
    assert!(Arc::ptr_eq(&c.parent().await.unwrap(), &b));
}

#[tokio::test]
async fn test_persisted_reparent_rewrites_stored_parent() {
    let (world, store) = stored_world();
    let a = world.create_object(&record(None, "a"), true).await.unwrap();
    let b = world.create_object(&record(None, "b"), true).await.unwrap();
    let c = world
        .create_object(&record(Some(a.id()), "c"), true)
        .await
        .unwrap();
    assert_eq!(store.object(&c.id()).unwrap().parent_id, Some(a.id()));

    c.set_parent(&b, true).await.unwrap();
    assert_eq!(store.object(&c.id()).unwrap().parent_id, Some(b.id()));

    // a child that was never stored cannot have its parent rewritten
    let loose = world.create_object(&record(None, "loose"), false).await.unwrap();
    assert!(matches!(
        loose.set_parent(&b, true).await,
        Err(UniverseError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reparent_moves_child_between_parents() {
    let world = world();
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    let b = world.create_object(&record(None, "b"), false).await.unwrap();
    let c = world
        .create_object(&record(Some(a.id()), "c"), false)
        .await
        .unwrap();

    c.set_parent(&b, false).await.unwrap();
    assert!(a.children().await.is_empty());
    assert_eq!(b.children().await.len(), 1);
    assert!(Arc::ptr_eq(&c.parent().await.unwrap(), &b));
    assert_eq!(world.object_count(), 4);
}

#[tokio::test]
async fn test_recursive_send_counts_every_descendant() {
    let world = world();
    let r = world.root();
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    world.create_object(&record(Some(a.id()), "b"), false).await.unwrap();
    world.create_object(&record(None, "c"), false).await.unwrap();

    let frame = Bytes::from_static(b"frame");
    assert_eq!(r.send(frame.clone(), true).await, 4);
    assert_eq!(r.send(frame.clone(), false).await, 1);
    assert_eq!(a.send(frame, true).await, 2);
}

#[tokio::test]
async fn test_queries_and_filters() {
    let world = world();
    let r = world.root();
    let a = world.create_object(&record(None, "lamp"), false).await.unwrap();
    let b = world
        .create_object(&record(Some(a.id()), "lamp-bulb"), false)
        .await
        .unwrap();
    world.create_object(&record(None, "chair"), false).await.unwrap();

    assert_eq!(r.get_objects(false).await.len(), 2);
    assert_eq!(r.get_objects(true).await.len(), 3);
    assert!(r.get_object(&b.id(), false).await.is_none());
    assert!(r.get_object(&b.id(), true).await.is_some());

    let lamp_id = a.id();
    let under_lamp = r
        .filter_objects(move |o| o.id() != lamp_id, true)
        .await;
    assert_eq!(under_lamp.len(), 2);

    let missing = ObjectId::new();
    let result = r.remove_objects(&[b.id(), missing], true, false).await;
    let errors = result.unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(a.children().await.is_empty());
}

#[tokio::test]
async fn test_world_scope_change_reaches_object_and_root_sessions() {
    let world = world();
    let plugin = PluginId::new();
    let id = AttributeId::new(plugin, "color");
    world.ctx().attribute_types().insert(AttributeType {
        id: id.clone(),
        description: None,
        options: Some(
            AttributeOptions::from_json(json!({"posbus_auto": {"scope": ["world"], "topic": "paint"}}))
                .unwrap(),
        ),
    });
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    world.run().await;

    let (_root_session, mut on_root) = attached_session(world.root()).await;
    let (_a_session, mut on_a) = attached_session(&a).await;

    let value = AttributeValue::from_json(json!({"hex": "#ff0000"})).unwrap();
    a.attributes()
        .upsert(&id, |_| Ok(AttributePayload::with_value(value)), false)
        .await
        .unwrap();

    for rx in [&mut on_root, &mut on_a] {
        let frame = next_frame(rx).await;
        assert_eq!(message_type(&frame), MsgType::ATTRIBUTE_VALUE_CHANGED);
        let msg = AttributeValueChanged::from_frame(&frame).unwrap();
        assert_eq!(msg.topic, "paint");
        assert_eq!(msg.target_id, a.id().0);
    }
    world.stop().await;
}

#[tokio::test]
async fn test_disabled_object_does_not_announce_changes() {
    let world = world();
    let id = AttributeId::new(PluginId::new(), "state");
    world.ctx().attribute_types().insert(AttributeType {
        id: id.clone(),
        description: None,
        options: Some(AttributeOptions::from_json(json!({"posbus_auto": {"scope": ["object"]}})).unwrap()),
    });
    let a = world.create_object(&record(None, "a"), false).await.unwrap();
    world.run().await;
    a.set_enabled(false);
    let (_session, mut on_a) = attached_session(&a).await;

    a.attributes()
        .upsert(&id, |_| Ok(AttributePayload::default()), false)
        .await
        .unwrap();
    assert!(a.attributes().get_payload(&id).await.is_some());
    assert!(tokio::time::timeout(Duration::from_millis(100), on_a.recv())
        .await
        .is_err());
    world.stop().await;
}

#[tokio::test]
async fn test_attribute_persistence_failure_keeps_memory() {
    let store = Arc::new(crate::attributes::InMemoryStore::new());
    let ctx = UniverseContext::builder(UniverseConfig::default())
        .store(Arc::clone(&store))
        .build();
    let world = World::new(&record(None, "world"), ctx);
    let id = AttributeId::new(PluginId::new(), "note");

    store.set_fail_writes(true);
    let value = AttributeValue::from_json(json!({"text": "hi"})).unwrap();
    let result = world
        .root()
        .attributes()
        .upsert(&id, |_| Ok(AttributePayload::with_value(value.clone())), true)
        .await;
    assert!(matches!(result, Err(UniverseError::Persistence(_))));
    assert_eq!(world.root().attributes().get_value(&id).await, Some(value));

    assert!(!world.root().attributes().remove(&AttributeId::new(PluginId::new(), "x"), true).await.unwrap());
}

#[tokio::test]
async fn test_effective_options_follow_type_and_instance_changes() {
    let world = world();
    let ctx = world.ctx();
    let type_id = ObjectTypeId::new();
    ctx.object_types().insert(ObjectType {
        id: type_id,
        name: "light".to_string(),
        asset_3d_id: None,
        options: Some(ObjectOptions::from_json(json!({"minimap": false, "allowed_subobjects": []})).unwrap()),
    });
    let a = world.create_object(&record(None, "a"), false).await.unwrap();

    assert!(a.definition().await.show_on_minimap);
    a.set_object_type(type_id, false).await.unwrap();
    assert_eq!(a.effective_options().await.unwrap().minimap, Some(false));
    assert!(!a.definition().await.show_on_minimap);

    a.set_options(
        Some(ObjectOptions::from_json(json!({"minimap": true})).unwrap()),
        false,
    )
    .await
    .unwrap();
    assert_eq!(a.effective_options().await.unwrap().minimap, Some(true));

    assert!(matches!(
        a.set_object_type(ObjectTypeId::new(), false).await,
        Err(UniverseError::NotFound(_))
    ));
}
