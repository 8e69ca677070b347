//! Integration tests for the hub control loop over in-memory transports.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use channelhub_core::config::hub::HubConfig;
use channelhub_realtime::{
    Channel, ChannelHub, ChannelResolver, ClientIdentity, ClientInfo, DataResolver, HubError,
    HubHooks, HubMessage, Method, Resolution,
};

use helpers::{TestClient, eventually, start_hub};

/// Lets clients create any unknown static channel and counts the calls.
#[derive(Default)]
struct AllowCreate {
    calls: AtomicUsize,
}

#[async_trait]
impl ChannelResolver for AllowCreate {
    async fn resolve(&self, _msg: &HubMessage, _client: &ClientInfo) -> Resolution {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Resolution::create()
    }
}

struct DenyAll;

#[async_trait]
impl ChannelResolver for DenyAll {
    async fn resolve(&self, _msg: &HubMessage, _client: &ClientInfo) -> Resolution {
        Resolution::deny()
    }
}

/// Offers a channel owned by `root` for any unknown id.
struct OfferForeign;

#[async_trait]
impl ChannelResolver for OfferForeign {
    async fn resolve(&self, msg: &HubMessage, _client: &ClientInfo) -> Resolution {
        Resolution::channel(Channel::builder(msg.channel_id.clone()).owner("root").build())
    }
}

struct StatsResolver;

#[async_trait]
impl DataResolver for StatsResolver {
    async fn fill(&self, msg: &mut HubMessage, client: &ClientInfo) {
        msg.data = Some(json!({ "channel": msg.channel_id, "user": client.user_id }));
    }
}

fn sub(cid: &str) -> Value {
    json!({ "m": "sub", "cid": cid })
}

fn publish(cid: &str, data: Value) -> Value {
    json!({ "m": "pub", "cid": cid, "d": data })
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let hub = ChannelHub::new(HubConfig::default(), HubHooks::default());

    assert!(matches!(
        hub.broadcast("news", json!("x")).await,
        Err(HubError::NotRunning)
    ));
    assert!(matches!(
        hub.broadcast_to_user("alice", json!("x")).await,
        Err(HubError::NotRunning)
    ));
    assert!(matches!(hub.put(Vec::new()), Err(HubError::EmptyDeclaration)));
    assert!(matches!(
        hub.put(vec![Channel::builder("me").build()]),
        Err(HubError::InvalidChannel(_))
    ));

    hub.run(vec![Channel::builder("").build()]).unwrap();
    assert!(hub.is_running());
    assert!(matches!(hub.run(Vec::new()), Err(HubError::AlreadyRunning)));
    assert!(matches!(
        hub.put(vec![Channel::builder("late").build()]),
        Err(HubError::AlreadyRunning)
    ));
    assert!(hub.broadcast("news", json!("x")).await.is_ok());

    hub.close().await;
    hub.close().await;
    assert!(!hub.is_running());
    assert!(matches!(
        hub.broadcast("news", json!("x")).await,
        Err(HubError::NotRunning)
    ));
    assert!(matches!(hub.run(Vec::new()), Err(HubError::Closed)));
    assert!(matches!(
        hub.put(vec![Channel::builder("late").build()]),
        Err(HubError::Closed)
    ));
}

#[tokio::test]
async fn test_system_channels_are_announced_and_read_only() {
    let hub = start_hub(
        HubHooks::default(),
        vec![Channel::builder("news").system(true).build()],
    );
    let mut alice = TestClient::connect(&hub, "alice").await;
    let mut bob = TestClient::connect(&hub, "bob").await;

    assert_eq!(alice.system_channels, vec!["news".to_string()]);
    assert!(alice.connection.is_subscribed("news"));

    hub.broadcast("news", json!("headline")).await.unwrap();
    for client in [&mut alice, &mut bob] {
        let msg = client.recv().await;
        assert_eq!(msg.method, Some(Method::Publish));
        assert_eq!(msg.channel_id, "news");
        assert_eq!(msg.data, Some(json!("headline")));
    }

    alice.send(publish("news", json!("spoofed")));
    alice.send(json!({ "m": "unsub", "cid": "news" }));
    bob.assert_silent().await;
    alice.assert_silent().await;
    assert!(alice.connection.is_subscribed("news"));
    assert_eq!(hub.channel_count(), 1);

    hub.close().await;
}

#[tokio::test]
async fn test_rooms_scenario_publish_needs_grant() {
    let resolver = Arc::new(AllowCreate::default());
    let hub = start_hub(
        HubHooks::new().with_channel_resolver(resolver.clone()),
        Vec::new(),
    );
    let mut x = TestClient::connect(&hub, "X").await;
    let mut y = TestClient::connect(&hub, "Y").await;

    x.send(json!({ "m": "sub", "cid": "rooms/1", "c": { "rights": "--r-" } }));
    let ack = x.recv().await;
    assert_eq!(ack.method, Some(Method::Subscribe));
    assert_eq!(ack.data, Some(json!("ok")));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    eventually(|| hub.channel_count() == 1).await;

    y.send(sub("rooms/1"));
    let ack = y.recv().await;
    assert_eq!(ack.data, Some(json!("ok")));
    let joined = x.recv().await;
    assert_eq!(joined.method, Some(Method::Subscribe));
    assert_eq!(joined.client_id, "Y");

    y.send(publish("rooms/1", json!("denied")));
    x.assert_silent().await;

    x.send(json!({ "m": "pub", "cid": "rooms/1", "d": "from owner" }));
    let msg = y.recv().await;
    assert_eq!(msg.data, Some(json!("from owner")));
    assert_eq!(msg.client_id, "X");

    x.send(json!({
        "m": "update",
        "cid": "rooms/1",
        "c": { "id": "rooms/1", "grant": { "Y": "-w" } }
    }));
    assert_eq!(x.recv().await.method, Some(Method::Update));
    assert_eq!(y.recv().await.method, Some(Method::Update));

    y.send(publish("rooms/1", json!("allowed")));
    let msg = x.recv().await;
    assert_eq!(msg.method, Some(Method::Publish));
    assert_eq!(msg.data, Some(json!("allowed")));
    assert_eq!(msg.client_id, "Y");
    y.assert_silent().await;

    hub.close().await;
}

#[tokio::test]
async fn test_writer_cannot_take_ownership() {
    let hub = start_hub(HubHooks::default(), Vec::new());
    let mut owner = TestClient::connect(&hub, "alice").await;
    let mut writer = TestClient::connect(&hub, "bob").await;

    owner.send(json!({
        "m": "sub",
        "cid": "board",
        "c": { "rights": "--rw", "owner": "mallory" }
    }));
    owner.recv().await;
    writer.send(sub("board"));
    writer.recv().await;
    owner.recv().await;

    writer.send(json!({ "m": "update", "cid": "board", "c": { "owner": "bob" } }));
    writer.assert_silent().await;
    owner.assert_silent().await;

    owner.send(json!({ "m": "update", "cid": "board", "c": { "rights": "----" } }));
    owner.recv().await;
    writer.recv().await;

    writer.send(publish("board", json!("blocked")));
    owner.assert_silent().await;

    hub.close().await;
}

#[tokio::test]
async fn test_last_unsubscribe_removes_channel() {
    let (removed_tx, mut removed_rx) = mpsc::unbounded_channel();
    let hooks = HubHooks::new().on_removed(move |channel, client| {
        let user = client.map(|c| c.user_id.clone()).unwrap_or_default();
        let _ = removed_tx.send((channel.id().to_string(), user));
    });
    let hub = start_hub(hooks, Vec::new());
    let mut alice = TestClient::connect(&hub, "alice").await;
    let mut bob = TestClient::connect(&hub, "bob").await;

    alice.send(json!({ "m": "sub", "cid": "lobby", "c": { "rights": "r-r-" } }));
    alice.recv().await;
    bob.send(sub("lobby"));
    bob.recv().await;
    alice.recv().await;

    bob.send(json!({ "m": "unsub", "cid": "lobby" }));
    let ack = bob.recv().await;
    assert_eq!(ack.method, Some(Method::Unsubscribe));
    assert_eq!(ack.data, Some(json!("ok")));
    let left = alice.recv().await;
    assert_eq!(left.method, Some(Method::Unsubscribe));
    assert_eq!(left.client_id, "bob");

    alice.send(json!({ "m": "unsub", "cid": "lobby" }));
    alice.recv().await;

    let removed = tokio::time::timeout(helpers::RECV_TIMEOUT, removed_rx.recv())
        .await
        .unwrap();
    assert_eq!(removed, Some(("lobby".to_string(), "alice".to_string())));
    eventually(|| hub.channel_count() == 0).await;
    assert!(alice.connection.channel_ids().is_empty());

    alice.send(json!({ "m": "unsub", "cid": "lobby" }));
    alice.assert_silent().await;

    hub.close().await;
}

#[tokio::test]
async fn test_owner_template_only_matches_owner() {
    let resolver = Arc::new(AllowCreate::default());
    let (created_tx, mut created_rx) = mpsc::unbounded_channel();
    let hub = start_hub(
        HubHooks::new().with_channel_resolver(resolver.clone()),
        vec![
            Channel::builder("me/:Owner/:doc")
                .on_created(move |channel, _| {
                    let _ = created_tx.send((
                        channel.id_param("Owner").to_string(),
                        channel.id_param("doc").to_string(),
                    ));
                })
                .build(),
        ],
    );
    let mut alice = TestClient::connect(&hub, "alice").await;
    let mut bob = TestClient::connect(&hub, "bob").await;

    bob.send(sub("me/alice/report1"));
    bob.assert_silent().await;
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    assert_eq!(hub.channel_count(), 0);

    alice.send(sub("me/alice/report1"));
    assert_eq!(alice.recv().await.data, Some(json!("ok")));
    let created = tokio::time::timeout(helpers::RECV_TIMEOUT, created_rx.recv())
        .await
        .unwrap();
    assert_eq!(created, Some(("alice".to_string(), "report1".to_string())));

    bob.send(sub("me/alice/report1"));
    bob.assert_silent().await;

    hub.close().await;
}

#[tokio::test]
async fn test_resolver_denial_and_creation_limit() {
    let hub = Arc::new(ChannelHub::new(
        HubConfig {
            client_create_channel_limit: 1,
            ..HubConfig::default()
        },
        HubHooks::default(),
    ));
    hub.run(Vec::new()).unwrap();
    let mut alice = TestClient::connect(&hub, "alice").await;

    alice.send(sub("first"));
    assert_eq!(alice.recv().await.data, Some(json!("ok")));
    alice.send(sub("second"));
    alice.assert_silent().await;
    assert_eq!(hub.channel_count(), 1);
    hub.close().await;

    let hub = start_hub(HubHooks::new().with_channel_resolver(Arc::new(DenyAll)), Vec::new());
    let mut bob = TestClient::connect(&hub, "bob").await;
    bob.send(sub("anything"));
    bob.assert_silent().await;
    assert_eq!(hub.channel_count(), 0);
    hub.close().await;
}

#[tokio::test]
async fn test_denied_subscribe_registers_nothing() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let hub = start_hub(
        HubHooks::new().on_created(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        vec![Channel::builder("rooms/:id").build()],
    );
    let mut bob = TestClient::connect(&hub, "bob").await;
    for n in 0..5 {
        bob.send(sub(&format!("rooms/{n}")));
    }
    bob.assert_silent().await;
    assert_eq!(hub.channel_count(), 0);
    assert!(bob.connection.channel_ids().is_empty());
    hub.close().await;

    let hub = start_hub(
        HubHooks::new().with_channel_resolver(Arc::new(OfferForeign)),
        Vec::new(),
    );
    let mut bob = TestClient::connect(&hub, "bob").await;
    bob.send(sub("secret"));
    bob.assert_silent().await;
    assert_eq!(hub.channel_count(), 0);
    assert_eq!(hub.metrics().channels_created, 0);
    hub.close().await;

    assert_eq!(created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_data_requests_answer_sender_only() {
    let hub = start_hub(
        HubHooks::new().with_data_resolver(Arc::new(StatsResolver)),
        Vec::new(),
    );
    let mut alice = TestClient::connect(&hub, "alice").await;
    let mut bob = TestClient::connect(&hub, "bob").await;

    alice.send(json!({ "m": "data", "cid": "stats", "rid": 5 }));
    let reply = alice.recv().await;
    assert_eq!(reply.method, Some(Method::Data));
    assert_eq!(reply.request_id, Some(5));
    assert_eq!(reply.data, Some(json!({ "channel": "stats", "user": "alice" })));
    bob.assert_silent().await;

    hub.close().await;
}

#[tokio::test]
async fn test_malformed_and_unroutable_frames_are_skipped() {
    let hub = start_hub(HubHooks::default(), Vec::new());
    let mut alice = TestClient::connect(&hub, "alice").await;

    alice.send_raw("not json");
    alice.send(json!({ "m": "shout", "cid": "x" }));
    alice.send(json!({ "cid": "x" }));
    alice.send(sub("me"));
    alice.send(sub(""));
    alice.send(sub(&"x".repeat(141)));
    alice.assert_silent().await;

    alice.send(json!({ "m": "sub", "c": { "id": "fallback" } }));
    let ack = alice.recv().await;
    assert_eq!(ack.channel_id, "fallback");
    assert_eq!(ack.client_id, "alice");
    assert!(hub.metrics().messages_dropped >= 6);

    hub.close().await;
}

#[tokio::test]
async fn test_broadcast_to_user_reaches_every_connection() {
    let hub = start_hub(HubHooks::default(), Vec::new());
    let mut first = TestClient::connect(&hub, "alice").await;
    let mut second = TestClient::connect_with(
        &hub,
        ClientIdentity::new("alice").with_session("tab-2"),
    )
    .await;
    let mut bob = TestClient::connect(&hub, "bob").await;
    assert_eq!(hub.session_count(), 2);

    let reached = hub
        .broadcast_to_user("alice", json!({ "unread": 3 }))
        .await
        .unwrap();
    assert_eq!(reached, 2);
    for client in [&mut first, &mut second] {
        let msg = client.recv().await;
        assert_eq!(msg.channel_id, "me");
        assert_eq!(msg.data, Some(json!({ "unread": 3 })));
    }
    bob.assert_silent().await;
    assert_eq!(hub.broadcast_to_user("nobody", json!(1)).await.unwrap(), 0);

    hub.close().await;
}

#[tokio::test]
async fn test_disconnect_cleans_up_session_and_channels() {
    let (unsub_tx, mut unsub_rx) = mpsc::unbounded_channel();
    let hub = start_hub(
        HubHooks::new().on_unsubscribed(move |channel, _| {
            let _ = unsub_tx.send(channel.id().to_string());
        }),
        vec![Channel::builder("news").system(true).build()],
    );
    let mut alice = TestClient::connect(&hub, "alice").await;
    let mut bob = TestClient::connect(&hub, "bob").await;

    alice.send(json!({ "m": "sub", "cid": "chat", "c": { "rights": "r-r-" } }));
    alice.recv().await;
    bob.send(sub("chat"));
    bob.recv().await;
    alice.recv().await;

    bob.disconnect();
    let left = alice.recv().await;
    assert_eq!(left.method, Some(Method::Unsubscribe));
    assert_eq!(left.client_id, "bob");
    assert_eq!(left.data, None);
    assert_eq!(
        tokio::time::timeout(helpers::RECV_TIMEOUT, unsub_rx.recv())
            .await
            .unwrap()
            .as_deref(),
        Some("chat")
    );
    bob.expect_closed().await;
    eventually(|| hub.session_count() == 1).await;
    assert!(bob.connection.is_closed());
    assert!(bob.connection.channel_ids().is_empty());
    assert_eq!(hub.channel_count(), 2);

    hub.close().await;
    alice.expect_closed().await;
    assert!(alice.connection.is_closed());
    assert_eq!(hub.session_count(), 0);
}

#[tokio::test]
async fn test_before_broadcast_can_veto() {
    let hub = start_hub(
        HubHooks::default(),
        vec![
            Channel::builder("alerts")
                .system(true)
                .before_broadcast(|_, msg| msg.data != Some(json!("drop me")))
                .build(),
        ],
    );
    let mut alice = TestClient::connect(&hub, "alice").await;

    hub.broadcast("alerts", json!("drop me")).await.unwrap();
    alice.assert_silent().await;
    hub.broadcast("alerts", json!("keep me")).await.unwrap();
    assert_eq!(alice.recv().await.data, Some(json!("keep me")));

    hub.close().await;
}
