use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::PollSender;

use roam_db::{Database, NewBoard};
use roam_gateway::Gateway;
use roam_gateway::config::GatewayConfig;
use roam_gateway::identity::JwtResolver;
use roam_gateway::registry::SessionRegistry;
use roam_gateway::session::handle_connection;
use roam_types::api::UserIdentity;
use roam_types::events::GatewayEvent;
use roam_types::models::Snowflake;

const SECRET: &str = "test-secret";
const ALICE: Snowflake = 1;
const BOB: Snowflake = 2;
const BOARD: Snowflake = 100;

struct Harness {
    gateway: Gateway,
    tokens: JwtResolver,
}

impl Harness {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        db.ensure_user(ALICE, "alice", "0001").unwrap();
        db.create_board(&NewBoard {
            id: BOARD,
            name: "roam".into(),
            creator_id: ALICE,
            owner_role_id: 101,
            everyone_role_id: 102,
            general_channel_id: 103,
        })
        .unwrap();

        Self {
            gateway: Gateway {
                registry: SessionRegistry::new(),
                db: Arc::new(db),
                resolver: Arc::new(JwtResolver::new(SECRET)),
                config: Arc::new(GatewayConfig::default()),
            },
            tokens: JwtResolver::new(SECRET),
        }
    }

    fn token(&self, id: Snowflake, username: &str) -> String {
        let identity = UserIdentity {
            id,
            username: username.into(),
            discriminator: "0001".into(),
        };
        self.tokens.issue(&identity, 1).unwrap()
    }

    fn connect(&self) -> Client {
        let (client_tx, server_rx) = mpsc::unbounded_channel::<Message>();
        let (server_tx, client_rx) = mpsc::channel::<Message>(64);

        let stream = Box::pin(futures_util::stream::unfold(server_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (Ok::<_, Infallible>(msg), rx))
        }));
        let sink = PollSender::new(server_tx);

        let task = tokio::spawn(handle_connection(sink, stream, self.gateway.clone()));
        Client {
            tx: client_tx,
            rx: client_rx,
            task,
        }
    }

    /// Connect and complete the handshake; the HELLO and READY frames are consumed.
    async fn identified(&self, id: Snowflake, username: &str) -> Client {
        let mut client = self.connect();
        assert_eq!(client.frame().await["op"], 10);
        client.send(json!({ "op": 2, "d": { "token": self.token(id, username) } }));
        let ready = client.frame().await;
        assert_eq!(ready["t"], "READY");
        client
    }
}

struct Client {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::Receiver<Message>,
    task: JoinHandle<()>,
}

impl Client {
    fn send(&self, value: Value) {
        self.send_text(&value.to_string());
    }

    fn send_text(&self, text: &str) {
        let _ = self.tx.send(Message::Text(text.to_owned().into()));
    }

    fn heartbeat(&self) {
        self.send(json!({ "op": 1 }));
    }

    async fn next(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(600), self.rx.recv())
            .await
            .expect("no frame from server")
    }

    async fn frame(&mut self) -> Value {
        match self.next().await {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    /// Skip text frames until the close frame and return its code.
    async fn close_code(&mut self) -> u16 {
        loop {
            match self.next().await {
                Some(Message::Close(Some(frame))) => return frame.code,
                Some(Message::Text(_)) => continue,
                other => panic!("expected a close frame, got {:?}", other),
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_handshake_sends_hello_ready_and_board_state() {
    let h = Harness::new();
    let mut client = h.connect();

    let hello = client.frame().await;
    assert_eq!(hello, json!({ "op": 10, "d": { "heartbeat_interval": 20000 } }));

    client.send(json!({ "op": 2, "d": { "token": h.token(ALICE, "alice") } }));
    let ready = client.frame().await;
    assert_eq!(ready["op"], 0);
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["d"]["user"]["id"], ALICE);
    assert_eq!(ready["d"]["boards"], json!([{ "id": BOARD, "unavailable": true }]));

    let board = client.frame().await;
    assert_eq!(board["t"], "BOARD_CREATE");
    assert_eq!(board["d"]["id"], BOARD);
    assert_eq!(board["d"]["owner"], true);
    assert_eq!(board["d"]["channels"][0]["name"], "general");

    assert!(h.gateway.registry.is_online(ALICE).await);
}

#[tokio::test(start_paused = true)]
async fn test_identify_errors_close_with_specific_codes() {
    let h = Harness::new();
    let cases = [
        ("{{{".to_string(), 4002),
        (json!({ "d": { "token": "x" } }).to_string(), 4003),
        (json!({ "op": "2", "d": { "token": "x" } }).to_string(), 4003),
        (json!({ "op": 1 }).to_string(), 4003),
        (json!({ "op": 2, "d": {} }).to_string(), 4001),
        (json!({ "op": 2, "d": { "token": "garbage" } }).to_string(), 4004),
    ];

    for (first, code) in cases {
        let mut client = h.connect();
        client.frame().await;
        client.send_text(&first);
        assert_eq!(client.close_code().await, code, "first frame {}", first);
    }
    assert_eq!(h.gateway.registry.online_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_is_closed_after_identify_deadline() {
    let h = Harness::new();
    let mut client = h.connect();
    client.frame().await;
    assert_eq!(client.close_code().await, 4003);
}

#[tokio::test(start_paused = true)]
async fn test_second_identify_closes_4005() {
    let h = Harness::new();
    let mut client = h.identified(BOB, "bob").await;
    client.send(json!({ "op": 2, "d": { "token": h.token(BOB, "bob") } }));
    assert_eq!(client.close_code().await, 4005);
    client.task.await.unwrap();
    assert!(!h.gateway.registry.is_online(BOB).await);
}

#[tokio::test(start_paused = true)]
async fn test_garbage_after_ready_closes_4002_and_unknown_ops_are_ignored() {
    let h = Harness::new();
    let mut client = h.identified(BOB, "bob").await;

    client.send(json!({ "op": 7, "d": null }));
    client.heartbeat();
    tokio::time::sleep(Duration::from_secs(16)).await;
    client.heartbeat();
    // The first heartbeat was too early, the second accepted.
    assert_eq!(client.frame().await["op"], 12);
    assert_eq!(client.frame().await["op"], 11);

    client.send_text("not json");
    assert_eq!(client.close_code().await, 4002);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_flood_closes_4008() {
    let h = Harness::new();
    let mut client = h.identified(BOB, "bob").await;

    for _ in 0..5 {
        client.heartbeat();
    }
    for _ in 0..4 {
        assert_eq!(client.frame().await["op"], 12);
    }
    assert_eq!(client.close_code().await, 4008);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_every_sixteen_seconds_keep_session_alive() {
    let h = Harness::new();
    let mut client = h.identified(BOB, "bob").await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(16)).await;
        client.heartbeat();
        assert_eq!(client.frame().await, json!({ "op": 11 }));
    }
    assert!(h.gateway.registry.is_online(BOB).await);
}

#[tokio::test(start_paused = true)]
async fn test_missing_heartbeats_close_4009() {
    let h = Harness::new();
    let mut client = h.identified(BOB, "bob").await;

    tokio::time::sleep(Duration::from_secs(26)).await;
    assert!(client.rx.try_recv().is_err());
    assert_eq!(client.close_code().await, 4009);
    assert!(!h.gateway.registry.is_online(BOB).await);
}

#[tokio::test(start_paused = true)]
async fn test_published_events_reach_connected_subscribers() {
    let h = Harness::new();
    let mut alice = h.identified(ALICE, "alice").await;
    assert_eq!(alice.frame().await["t"], "BOARD_CREATE");

    let channel = h.gateway.db.get_channel(103).unwrap().unwrap();
    let subscribers = h.gateway.db.subscribers(BOARD).unwrap();
    let n = h
        .gateway
        .registry
        .publish(GatewayEvent::ChannelUpdate(channel), &subscribers)
        .await;
    assert_eq!(n, 1);

    let event = alice.frame().await;
    assert_eq!(event["t"], "CHANNEL_UPDATE");
    assert_eq!(event["d"]["id"], 103);
    assert_eq!(event["d"]["type"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_session_replaces_old_one() {
    let h = Harness::new();
    let mut first = h.identified(BOB, "bob").await;
    let mut second = h.identified(BOB, "bob").await;

    assert_eq!(first.close_code().await, 1000);
    first.task.await.unwrap();

    // The old session's teardown must not evict the new one.
    assert!(h.gateway.registry.is_online(BOB).await);
    tokio::time::sleep(Duration::from_secs(16)).await;
    second.heartbeat();
    assert_eq!(second.frame().await["op"], 11);
}
