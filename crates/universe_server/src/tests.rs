// Include tests
#[cfg(test)]
mod tests {
    use crate::security::token;
    use crate::*;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use posbus::{message_type, HandShake, Message as _, MsgType, SetWorld, Signal, SignalType};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use universe::ObjectPersistence as _;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (Arc<UniverseServer>, SocketAddr) {
        let mut config = ServerConfig::default();
        config.security.jwt_secret = SECRET.to_string();
        config.acceptors = 2;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(create_server_with_config(config));
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve(listener, None).await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr, user: Uuid, session: Uuid, subject: Uuid) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let handshake = HandShake {
            handshake_version: 1,
            protocol_version: 1,
            user_id: user,
            session_id: session,
            token: token::sign(SECRET, &json!({"sub": subject.to_string()})),
            url: "https://universe.test/".to_string(),
        };
        ws.send(Message::Binary(handshake.to_frame())).await.unwrap();
        ws
    }

    /// Next binary frame, or `None` once the server closed the socket.
    async fn next_binary(ws: &mut Client) -> Option<Bytes> {
        loop {
            match timeout(Duration::from_secs(2), ws.next()).await.expect("frame in time") {
                Some(Ok(Message::Binary(frame))) => return Some(frame),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_valid_handshake_spawns_session() {
        let (server, addr) = start().await;
        let user = Uuid::new_v4();
        let mut ws = connect(addr, user, Uuid::new_v4(), user).await;

        let first = next_binary(&mut ws).await.expect("set world");
        assert_eq!(message_type(&first), MsgType::SET_WORLD);
        let spawn_id = server.config().universe.spawn_world_id;
        assert_eq!(SetWorld::from_frame(&first).unwrap().id, spawn_id.0);

        let world = server.node().get_world(&spawn_id).unwrap();
        eventually(|| world.user_count() == 1).await;
        assert!(server.node().ctx().session(&user.into()).is_some());

        ws.close(None).await.unwrap();
        eventually(|| world.user_count() == 0).await;
        eventually(|| server.node().ctx().session_count() == 0).await;
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mismatched_subject_is_rejected() {
        let (server, addr) = start().await;
        let mut ws = connect(addr, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).await;

        let frame = next_binary(&mut ws).await.expect("signal");
        assert_eq!(Signal::from_frame(&frame).unwrap().value, SignalType::InvalidToken);
        assert!(next_binary(&mut ws).await.is_none());

        assert_eq!(server.node().ctx().session_count(), 0);
        let spawn_id = server.config().universe.spawn_world_id;
        assert_eq!(server.node().get_world(&spawn_id).unwrap().user_count(), 0);
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_legacy_subject_is_admitted_as_any_user() {
        let (server, addr) = start().await;
        let bypass = server.config().security.legacy_subject_bypass[0];
        let mut ws = connect(addr, Uuid::new_v4(), Uuid::new_v4(), bypass).await;

        let first = next_binary(&mut ws).await.expect("set world");
        assert_eq!(message_type(&first), MsgType::SET_WORLD);
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_text_first_frame_is_not_a_handshake() {
        let (server, addr) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text("hello".into())).await.unwrap();

        assert!(next_binary(&mut ws).await.is_none());
        assert_eq!(server.node().ctx().session_count(), 0);
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_connection_replaces_the_first() {
        let (server, addr) = start().await;
        let user = Uuid::new_v4();
        let mut first = connect(addr, user, Uuid::new_v4(), user).await;
        assert!(next_binary(&mut first).await.is_some());

        let second_session = Uuid::new_v4();
        let mut second = connect(addr, user, second_session, user).await;
        assert!(next_binary(&mut second).await.is_some());

        let mut told = false;
        while let Some(frame) = next_binary(&mut first).await {
            if message_type(&frame) == MsgType::SIGNAL
                && Signal::from_frame(&frame).unwrap().value == SignalType::DualConnection
            {
                told = true;
            }
        }
        assert!(told);

        let spawn_id = server.config().universe.spawn_world_id;
        let world = server.node().get_world(&spawn_id).unwrap();
        eventually(|| world.user_count() == 1).await;
        let live = server.node().ctx().session(&user.into()).unwrap();
        assert_eq!(live.session_id().0, second_session);
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_stops_serving() {
        let mut config = ServerConfig::default();
        config.security.jwt_secret = SECRET.to_string();
        let server = Arc::new(create_server_with_config(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener, None).await });

        // the signal is only heard once the spawned serve has subscribed
        for _ in 0..100 {
            server.shutdown();
            if handle.is_finished() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let result = timeout(Duration::from_secs(2), handle).await.expect("serve returned");
        assert!(result.unwrap().is_ok());
    }

    /// Object store whose world loading waits until released.
    struct GatedStore {
        inner: universe::InMemoryStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl universe::ObjectPersistence for GatedStore {
        async fn load_world(&self, world_id: &universe::ObjectId) -> universe::Result<Vec<universe::ObjectRecord>> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.load_world(world_id).await
        }

        async fn upsert_object(&self, record: &universe::ObjectRecord) -> universe::Result<()> {
            self.inner.upsert_object(record).await
        }

        async fn update_parent(
            &self,
            id: &universe::ObjectId,
            parent_id: Option<&universe::ObjectId>,
        ) -> universe::Result<()> {
            self.inner.update_parent(id, parent_id).await
        }

        async fn remove_object(&self, id: &universe::ObjectId) -> universe::Result<()> {
            self.inner.remove_object(id).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_during_startup_is_not_lost() {
        let store = Arc::new(GatedStore {
            inner: universe::InMemoryStore::new(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let mut config = ServerConfig::default();
        config.security.jwt_secret = SECRET.to_string();
        let ctx = universe::UniverseContext::builder(config.universe.clone())
            .object_store(store.clone())
            .build();
        let server = Arc::new(UniverseServer::with_node(config, universe::Node::new(ctx)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener, None).await });

        timeout(Duration::from_secs(2), store.entered.notified())
            .await
            .expect("startup reached the store");
        server.shutdown();
        store.release.notify_one();

        let result = timeout(Duration::from_secs(2), handle).await.expect("serve returned");
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address.port(), 4000);
        assert_eq!(config.handshake_timeout_secs, 10);
        assert!(config.security.jwt_secret.is_empty());
        assert_eq!(config.security.legacy_subject_bypass.len(), 2);
        assert!(config.acceptor_count() >= 1);
    }
}
