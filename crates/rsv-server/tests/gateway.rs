//! End-to-end gateway behaviour over loopback sockets.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rsv_client::cli::wait_for_reply;
use rsv_client::{ChannelObserver, ClientConfig, ClientEvent, ConnectionStatus, ProtocolClient};
use rsv_crypto::{CryptoEngine, PublicKey};
use rsv_proto::reservation::slot_time;
use rsv_proto::{
    Envelope, ErrorBody, KeyExchangeRequest, KeyExchangeResponse, MessageType, Reservation,
    ResourceAction,
};
use rsv_server::audit::{OP_CONNECTION, OP_DISCONNECTION, OP_SECURITY, RESOURCE_API};
use rsv_server::{LocalRelay, MemoryAuditLog, ProtocolServer, Relay, RelayMode, ServerConfig, ServerHandle};
use rsv_store::ReservationStore;
use rsv_transport::{split_framed, FrameReader, FrameWriter, LengthCodec};
use tempfile::TempDir;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Relay wrapper counting forwarded operations.
struct CountingRelay {
    inner: Arc<dyn Relay>,
    calls: AtomicUsize,
}

impl CountingRelay {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Relay for CountingRelay {
    async fn forward(&self, action: ResourceAction, payload: &str, sender_id: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward(action, payload, sender_id).await
    }
}

struct Gateway {
    handle: ServerHandle,
    audit: Arc<MemoryAuditLog>,
    relay: Arc<CountingRelay>,
    server: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

impl Gateway {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReservationStore::open(dir.path().join("reservations.json")).await.unwrap());
        Self::start_with(Arc::new(LocalRelay::new(store)), dir).await
    }

    async fn start_with(inner: Arc<dyn Relay>, dir: TempDir) -> Self {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            server_id: "gw-test".into(),
            relay_mode: RelayMode::Local,
            relay_timeout_secs: 5,
            ..ServerConfig::default()
        };
        let audit = Arc::new(MemoryAuditLog::new());
        let relay = Arc::new(CountingRelay {
            inner,
            calls: AtomicUsize::new(0),
        });

        let server = ProtocolServer::bind(config, CryptoEngine::generate().unwrap(), audit.clone(), relay.clone())
            .await
            .unwrap();
        let handle = server.handle().unwrap();
        let server = tokio::spawn(server.run());

        Self {
            handle,
            audit,
            relay,
            server,
            _dir: dir,
        }
    }

    async fn connect(&self, id: &str) -> (ProtocolClient, UnboundedReceiver<ClientEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let config = ClientConfig::new(self.handle.local_addr().to_string()).with_client_id(id);
        let client = ProtocolClient::connect(config, Arc::new(observer)).await.unwrap();
        (client, rx)
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

async fn reply(rx: &mut UnboundedReceiver<ClientEvent>) -> Envelope {
    wait_for_reply(rx, Duration::from_secs(10)).await.unwrap()
}

fn ana() -> Reservation {
    Reservation::new("Ana", slot_time::parse("2024-06-01T20:00").unwrap(), 2, 5)
}

/// A hand-driven client, for frames `ProtocolClient` would never send.
struct RawPeer {
    engine: CryptoEngine,
    server_key: PublicKey,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl RawPeer {
    async fn connect(gateway: &Gateway, id: &str) -> Self {
        let engine = CryptoEngine::generate().unwrap();
        let stream = TcpStream::connect(gateway.handle.local_addr()).await.unwrap();
        let (mut reader, mut writer) = split_framed(stream, LengthCodec::default());

        let hello = KeyExchangeRequest {
            sender_id: id.into(),
            public_key: engine.export_public_key(),
        };
        writer
            .write_frame(&hello.to_envelope().unwrap().to_bytes().unwrap())
            .await
            .unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        let response = KeyExchangeResponse::from_envelope(&Envelope::from_bytes(&frame).unwrap()).unwrap();
        let server_key = CryptoEngine::import_public_key(&response.server_public_key).unwrap();

        Self {
            engine,
            server_key,
            reader,
            writer,
        }
    }

    async fn send_sealed(&mut self, envelope: &Envelope) {
        let frame = self
            .engine
            .encrypt(&envelope.to_bytes().unwrap(), &self.server_key)
            .unwrap();
        self.writer.write_frame(&frame).await.unwrap();
    }

    fn signed(&self, sender: &str, action: &str, data: &str) -> Envelope {
        let mut envelope = Envelope::request(action, data).with_sender(sender);
        envelope.signature = self.engine.sign_base64(data.as_bytes()).unwrap();
        envelope
    }

    async fn expect_silence(&mut self) {
        let read = tokio::time::timeout(Duration::from_millis(500), self.reader.read_frame()).await;
        assert!(read.is_err(), "gateway answered a rejected frame");
    }

    async fn read_reply(&mut self) -> Envelope {
        let frame = tokio::time::timeout(Duration::from_secs(10), self.reader.read_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let envelope = Envelope::from_bytes(&self.engine.decrypt(&frame).unwrap()).unwrap();
        assert!(CryptoEngine::verify_base64(
            envelope.data.as_bytes(),
            &envelope.signature,
            &self.server_key
        ));
        envelope
    }
}

#[tokio::test]
async fn test_handshake_registers_client_key() {
    let gateway = Gateway::start().await;
    let (client, _rx) = gateway.connect("alice").await;

    let registry = gateway.handle.registry();
    wait_until(|| async move { registry.session_count() == 1 }).await;

    let registered = registry.lookup_key("alice").unwrap();
    assert_eq!(
        registered,
        CryptoEngine::import_public_key(&client.public_key()).unwrap()
    );
    assert_eq!(
        client.server_public_key(),
        &CryptoEngine::import_public_key(&gateway.handle.server_public_key()).unwrap()
    );
    assert_eq!(client.server_id(), "gw-test");

    let audit = &gateway.audit;
    wait_until(|| async move { audit.by_operation(OP_CONNECTION).await.len() == 1 }).await;
    let connections = gateway.audit.by_operation(OP_CONNECTION).await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].client_id, "alice");
    assert_eq!(gateway.handle.stats().snapshot().handshakes_completed, 1);
}

/// Open a socket, send `first` as the opening frame and expect the gateway to
/// hang up without answering.
async fn expect_rejected_handshake(gateway: &Gateway, first: &Envelope) {
    let stream = TcpStream::connect(gateway.handle.local_addr()).await.unwrap();
    let (mut reader, mut writer) = split_framed(stream, LengthCodec::default());
    writer.write_frame(&first.to_bytes().unwrap()).await.unwrap();

    let read = tokio::time::timeout(Duration::from_secs(10), reader.read_frame())
        .await
        .expect("gateway kept a rejected connection open");
    assert!(matches!(read, Ok(None)), "gateway answered a rejected key exchange: {:?}", read);

    let stats = gateway.handle.stats().snapshot();
    assert_eq!(stats.handshakes_failed, 1);
    assert_eq!(stats.handshakes_completed, 0);

    let registry = gateway.handle.registry();
    assert_eq!(registry.session_count(), 0);
    assert!(registry.lookup_key("mallory").is_none());
}

fn key_exchange(public_key: String) -> Envelope {
    KeyExchangeRequest {
        sender_id: "mallory".into(),
        public_key,
    }
    .to_envelope()
    .unwrap()
}

#[tokio::test]
async fn test_first_frame_must_be_key_exchange() {
    let gateway = Gateway::start().await;
    let first = Envelope::request("list", "[]").with_sender("mallory");
    expect_rejected_handshake(&gateway, &first).await;
    assert_eq!(gateway.relay.calls(), 0);
}

#[tokio::test]
async fn test_signed_key_exchange_is_rejected() {
    let gateway = Gateway::start().await;
    let engine = CryptoEngine::generate().unwrap();
    let mut hello = key_exchange(engine.export_public_key());
    hello.signature = engine.sign_base64(hello.data.as_bytes()).unwrap();
    expect_rejected_handshake(&gateway, &hello).await;
}

#[tokio::test]
async fn test_malformed_public_key_is_rejected() {
    let gateway = Gateway::start().await;
    let hello = key_exchange("-----BEGIN PUBLIC KEY-----\nbm90IGEga2V5\n-----END PUBLIC KEY-----".into());
    expect_rejected_handshake(&gateway, &hello).await;
}

#[tokio::test]
async fn test_short_public_key_is_rejected() {
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    let gateway = Gateway::start().await;
    let small = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 1024).unwrap();
    let pem = rsa::RsaPublicKey::from(&small).to_public_key_pem(LineEnding::LF).unwrap();
    expect_rejected_handshake(&gateway, &key_exchange(pem)).await;
}

#[tokio::test]
async fn test_end_to_end_reservation() {
    let gateway = Gateway::start().await;
    let (alice, mut alice_rx) = gateway.connect("alice").await;
    let (bob, mut bob_rx) = gateway.connect("bob").await;

    alice.create(&ana()).await.unwrap();
    let created = reply(&mut alice_rx).await;
    assert_eq!(created.msg_type, MessageType::Response);
    assert_eq!(created.action, "create");
    assert_eq!(created.sender_id, "gw-test");
    let created: Reservation = created.payload().unwrap();
    assert_eq!(created.id, 1);
    assert_ne!(created.created_at, chrono::DateTime::<chrono::Utc>::default());

    bob.create(&ana()).await.unwrap();
    let conflict = reply(&mut bob_rx).await;
    let body = ErrorBody::parse(&conflict.data).expect("conflict body");
    assert!(body.message.contains("already reserved"), "{}", body.message);

    bob.get(created.id).await.unwrap();
    let fetched: Reservation = reply(&mut bob_rx).await.payload().unwrap();
    assert_eq!(fetched, created);

    alice.get(created.id).await.unwrap();
    let fetched: Reservation = reply(&mut alice_rx).await.payload().unwrap();
    assert_eq!(fetched, created);

    // Every dispatched operation was audited under the API resource.
    let api_entries: Vec<_> = gateway
        .audit
        .entries()
        .await
        .into_iter()
        .filter(|e| e.resource == RESOURCE_API)
        .collect();
    assert_eq!(api_entries.len(), 4);
    assert_eq!(gateway.relay.calls(), 4);
}

#[tokio::test]
async fn test_concurrent_creates_one_wins() {
    let gateway = Gateway::start().await;
    let (alice, mut alice_rx) = gateway.connect("alice").await;
    let (bob, mut bob_rx) = gateway.connect("bob").await;

    let record = ana();
    let (a, b) = tokio::join!(alice.create(&record), bob.create(&record));
    a.unwrap();
    b.unwrap();

    let replies = [reply(&mut alice_rx).await, reply(&mut bob_rx).await];
    let failures = replies
        .iter()
        .filter(|r| ErrorBody::parse(&r.data).is_some())
        .count();
    assert_eq!(failures, 1);

    let winner: Reservation = replies
        .iter()
        .find(|r| ErrorBody::parse(&r.data).is_none())
        .unwrap()
        .payload()
        .unwrap();
    assert_eq!(winner.id, 1);
}

#[tokio::test]
async fn test_mismatched_sender_is_dropped() {
    let gateway = Gateway::start().await;
    let (_alice, _rx) = gateway.connect("alice").await;
    let mut mallory = RawPeer::connect(&gateway, "mallory").await;

    // Signed by mallory, claiming to be alice.
    let forged = mallory.signed("alice", "list", "{}");
    mallory.send_sealed(&forged).await;
    mallory.expect_silence().await;

    // Sender that never registered at all.
    let ghost = mallory.signed("ghost", "list", "{}");
    mallory.send_sealed(&ghost).await;
    mallory.expect_silence().await;

    let audit = &gateway.audit;
    wait_until(|| async move { audit.by_operation(OP_SECURITY).await.len() == 2 }).await;
    assert_eq!(gateway.relay.calls(), 0);
    assert_eq!(gateway.handle.stats().snapshot().signature_failures, 2);

    // The session survives and honest requests still work.
    let honest = mallory.signed("mallory", "list", "{}");
    mallory.send_sealed(&honest).await;
    let answer = mallory.read_reply().await;
    assert_eq!(answer.data, "[]");
    assert_eq!(gateway.relay.calls(), 1);
}

#[tokio::test]
async fn test_tampered_signature_is_audited() {
    let gateway = Gateway::start().await;
    let mut peer = RawPeer::connect(&gateway, "carol").await;

    let mut tampered = peer.signed("carol", "delete", r#"{"id":1}"#);
    tampered.data = r#"{"id":2}"#.into();
    peer.send_sealed(&tampered).await;
    peer.expect_silence().await;

    let mut unsigned = Envelope::request("list", "{}").with_sender("carol");
    unsigned.signature.clear();
    peer.send_sealed(&unsigned).await;
    peer.expect_silence().await;

    let audit = &gateway.audit;
    wait_until(|| async move { audit.by_operation(OP_SECURITY).await.len() == 2 }).await;
    let security = gateway.audit.by_operation(OP_SECURITY).await;
    assert!(security.iter().all(|e| e.client_id == "carol"));
    assert_eq!(gateway.relay.calls(), 0);
    assert!(gateway
        .audit
        .entries()
        .await
        .iter()
        .all(|e| e.resource != RESOURCE_API));
}

#[tokio::test]
async fn test_unsigned_disconnect_ends_session() {
    let gateway = Gateway::start().await;
    let (client, mut rx) = gateway.connect("dave").await;
    let registry = gateway.handle.registry();
    wait_until(|| async move { registry.session_count() == 1 }).await;

    client.disconnect().await.unwrap();
    wait_until(|| async move { registry.session_count() == 0 }).await;
    let audit = &gateway.audit;
    wait_until(|| async move { audit.by_operation(OP_DISCONNECTION).await.len() == 1 }).await;

    let ended = gateway.audit.by_operation(OP_DISCONNECTION).await;
    assert_eq!(ended[0].details, "client requested disconnect");

    let stats = gateway.handle.stats().snapshot();
    assert_eq!(stats.signature_failures, 0);
    assert_eq!(stats.decryption_failures, 0);
    assert!(gateway.audit.by_operation(OP_SECURITY).await.is_empty());

    let mut saw_disconnected = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ClientEvent::Status(ConnectionStatus::Disconnected)) {
            saw_disconnected = true;
        }
    }
    assert!(saw_disconnected);
}

#[tokio::test]
async fn test_unknown_command_gets_error_envelope() {
    let gateway = Gateway::start().await;
    let (client, mut rx) = gateway.connect("erin").await;

    client.send(Envelope::request("purge", "{}"), true).await.unwrap();
    let answer = reply(&mut rx).await;
    assert_eq!(answer.msg_type, MessageType::Error);
    assert_eq!(answer.action, "Error");
    assert_eq!(ErrorBody::parse(&answer.data).unwrap().message, "unknown command");
    assert_eq!(gateway.relay.calls(), 0);
}

#[tokio::test]
async fn test_unencrypted_request_is_discarded() {
    let gateway = Gateway::start().await;
    let (client, mut rx) = gateway.connect("frank").await;

    client.send(Envelope::request("list", "{}"), false).await.unwrap();
    let stats = gateway.handle.stats();
    wait_until(|| async move { stats.snapshot().decryption_failures == 1 }).await;
    assert_eq!(gateway.relay.calls(), 0);

    client.list().await.unwrap();
    let answer = reply(&mut rx).await;
    assert_eq!(answer.action, "list");
    assert_eq!(answer.data, "[]");
    assert_eq!(gateway.relay.calls(), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_every_session() {
    let gateway = Gateway::start().await;
    let (_a, mut a_rx) = gateway.connect("alice").await;
    let (_b, mut b_rx) = gateway.connect("bob").await;
    let registry = gateway.handle.registry();
    wait_until(|| async move { registry.session_count() == 2 }).await;

    let delivered = gateway
        .handle
        .broadcast("announcement", r#"{"message":"kitchen closes at 23:00"}"#)
        .await;
    assert_eq!(delivered, 2);

    for rx in [&mut a_rx, &mut b_rx] {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let ClientEvent::Message {
                envelope,
                signature_valid,
            } = event
            {
                assert!(signature_valid);
                assert_eq!(envelope.msg_type, MessageType::Notification);
                assert_eq!(envelope.action, "announcement");
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let gateway = Gateway::start().await;
    let registry = gateway.handle.registry();

    let (_first, mut first_rx) = gateway.connect("gina").await;
    wait_until(|| async move { registry.session_count() == 1 }).await;
    let first_conn = registry.session("gina").unwrap().conn_id();

    let (second, mut second_rx) = gateway.connect("gina").await;
    wait_until(|| async move { registry.session("gina").map(|s| s.conn_id()) != Some(first_conn) }).await;

    // The old connection is closed by the server.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), first_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, ClientEvent::Status(ConnectionStatus::ConnectionLost)) {
            break;
        }
    }

    second.list().await.unwrap();
    assert_eq!(reply(&mut second_rx).await.data, "[]");
    assert_eq!(registry.session_count(), 1);
}

#[tokio::test]
async fn test_http_relay_against_rest_api() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ReservationStore::open(dir.path().join("api.json")).await.unwrap());
    let api = rsv_store::ApiServer::bind_with_store("127.0.0.1:0".parse().unwrap(), store)
        .await
        .unwrap();
    let api_addr = api.local_addr().unwrap();
    let api_shutdown = api.shutdown_handle();
    let api_task = tokio::spawn(api.run());

    let relay = rsv_server::HttpRelay::new(format!("http://{}", api_addr), Duration::from_secs(5)).unwrap();
    let gateway = Gateway::start_with(Arc::new(relay), dir).await;
    let (client, mut rx) = gateway.connect("hank").await;

    client.create(&ana()).await.unwrap();
    let created: Reservation = reply(&mut rx).await.payload().unwrap();
    assert_eq!(created.id, 1);

    client.create(&ana()).await.unwrap();
    assert!(ErrorBody::parse(&reply(&mut rx).await.data)
        .unwrap()
        .message
        .contains("already reserved"));

    client.delete(1).await.unwrap();
    assert_eq!(reply(&mut rx).await.data, r#"{"id":1}"#);

    client.get(1).await.unwrap();
    let missing = ErrorBody::parse(&reply(&mut rx).await.data).unwrap();
    assert!(missing.message.contains("not found"), "{}", missing.message);

    let _ = api_shutdown.send(true);
    tokio::time::timeout(Duration::from_secs(10), api_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let gateway = Gateway::start().await;
    let (client, mut rx) = gateway.connect("ivy").await;
    let registry = gateway.handle.registry();
    wait_until(|| async move { registry.session_count() == 1 }).await;

    gateway.handle.shutdown();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, ClientEvent::Status(ConnectionStatus::ConnectionLost)) {
            break;
        }
    }
    assert!(!client.is_connected());

    tokio::time::timeout(Duration::from_secs(10), gateway.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
