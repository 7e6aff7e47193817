//! TCP protocol server

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rsv_crypto::CryptoEngine;
use rsv_proto::{Envelope, KeyExchangeRequest, KeyExchangeResponse, MessageType, ACTION_DISCONNECT};
use rsv_transport::{FrameReader, FrameWriter, LengthCodec};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, OP_CONNECTION, OP_DISCONNECTION, OP_SECURITY, RESOURCE_SYSTEM};
use crate::config::ServerConfig;
use crate::dispatch::{authenticate, dispatch, send_sealed};
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::relay::Relay;
use crate::session::{BoxWriter, Session};
use crate::stats::ServerStats;

/// How long `run` waits for sessions to close after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Accepted,
    HandshakePending,
    Active,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Listening => "listening",
            ConnectionState::Accepted => "accepted",
            ConnectionState::HandshakePending => "handshake_pending",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent `Disconnect`
    Requested,
    /// Client closed the socket
    PeerClosed,
    /// No frame within the idle timeout
    Idle,
    /// Server shutting down
    Shutdown,
    /// Read or write failure
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "client requested disconnect"),
            DisconnectReason::PeerClosed => write!(f, "connection closed by client"),
            DisconnectReason::Idle => write!(f, "idle timeout"),
            DisconnectReason::Shutdown => write!(f, "server shutdown"),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Everything a connection task needs, shared by all of them.
pub struct ServerContext {
    config: ServerConfig,
    crypto: CryptoEngine,
    registry: ConnectionRegistry,
    audit: Arc<dyn AuditLog>,
    relay: Arc<dyn Relay>,
    stats: ServerStats,
    pub(crate) dispatch_lock: Mutex<()>,
    next_conn_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, crypto: CryptoEngine, audit: Arc<dyn AuditLog>, relay: Arc<dyn Relay>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            crypto,
            registry: ConnectionRegistry::new(),
            audit,
            relay,
            stats: ServerStats::new(),
            dispatch_lock: Mutex::new(()),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn crypto(&self) -> &CryptoEngine {
        &self.crypto
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &dyn AuditLog {
        self.audit.as_ref()
    }

    pub fn relay(&self) -> &dyn Relay {
        self.relay.as_ref()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record an audit entry, logging instead of failing.
    async fn audit_best_effort(&self, client_id: &str, operation: &str, details: &str) {
        if let Err(e) = self.audit.log_operation(client_id, operation, RESOURCE_SYSTEM, details).await {
            error!(client = client_id, operation, "audit write failed: {}", e);
        }
    }
}

/// Cloneable control handle of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_public_key(&self) -> String {
        self.ctx.crypto.export_public_key()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.ctx.registry
    }

    pub fn stats(&self) -> &ServerStats {
        &self.ctx.stats
    }

    /// Stop accepting and end every session.
    pub fn shutdown(&self) {
        let _ = self.ctx.shutdown_tx.send(true);
    }

    /// Send a signed, encrypted `Notification` to every active session.
    /// Returns how many sessions it reached.
    pub async fn broadcast(&self, action: &str, data: &str) -> usize {
        let mut delivered = 0;
        for session in self.ctx.registry.sessions() {
            let envelope = Envelope::new(MessageType::Notification, action, data);
            match send_sealed(&self.ctx, &session, envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client = session.id(), "broadcast failed: {}", e),
            }
        }
        debug!(action, delivered, "broadcast sent");
        delivered
    }
}

/// TCP server running the handshake, verification and dispatch protocol.
pub struct ProtocolServer {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl ProtocolServer {
    /// Bind `config.listen_addr`.
    pub async fn bind(
        config: ServerConfig,
        crypto: CryptoEngine,
        audit: Arc<dyn AuditLog>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        let ctx = Arc::new(ServerContext::new(config, crypto, audit, relay));
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> Result<ServerHandle> {
        Ok(ServerHandle {
            ctx: Arc::clone(&self.ctx),
            local_addr: self.local_addr()?,
        })
    }

    /// Accept connections until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let ProtocolServer { ctx, listener } = self;
        let addr = listener.local_addr()?;
        info!(server_id = %ctx.config.server_id, state = %ConnectionState::Listening, "rsv-server listening on {}", addr);

        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        ServerStats::incr(&ctx.stats.connections_accepted);
                        tokio::spawn(handle_connection(Arc::clone(&ctx), stream, remote_addr));
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }
        }

        info!("shutdown requested, no longer accepting connections");
        drop(listener);
        graceful_shutdown(&ctx).await;
        Ok(())
    }
}

async fn graceful_shutdown(ctx: &ServerContext) {
    let start = std::time::Instant::now();
    loop {
        let active = ctx.registry.session_count();
        if active == 0 {
            info!("all sessions closed, shutdown complete");
            break;
        }
        if start.elapsed() > SHUTDOWN_GRACE {
            warn!("shutdown grace period over, {} sessions still active", active);
            for session in ctx.registry.clear() {
                session.close().await;
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, remote_addr: SocketAddr) {
    let conn_id = ctx.next_conn_id();
    debug!(conn_id, %remote_addr, state = %ConnectionState::Accepted, "connection accepted");

    let codec = LengthCodec::new(ctx.config.max_frame_size);
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read, codec);
    let boxed: BoxWriter = Box::new(write);
    let mut writer = FrameWriter::new(boxed, codec);
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();

    debug!(conn_id, state = %ConnectionState::HandshakePending, "awaiting key exchange");
    let handshake = tokio::select! {
        result = handshake(&ctx, &mut reader, &mut writer) => result,
        _ = wait_for_shutdown(&mut shutdown_rx) => return,
    };
    let (client_id, public_key) = match handshake {
        Ok(done) => done,
        Err(e) => {
            ServerStats::incr(&ctx.stats.handshakes_failed);
            warn!(conn_id, %remote_addr, "handshake failed: {}", e);
            let _ = writer.shutdown().await;
            debug!(conn_id, state = %ConnectionState::Closed, "connection closed");
            return;
        }
    };

    let session = Arc::new(Session::new(client_id.clone(), conn_id, remote_addr, public_key, writer));
    if let Some(previous) = ctx.registry.add_session(Arc::clone(&session)) {
        info!(client = %client_id, old_conn = previous.conn_id(), "client reconnected, closing previous connection");
        previous.close().await;
    }
    ServerStats::incr(&ctx.stats.handshakes_completed);
    ctx.audit_best_effort(&client_id, OP_CONNECTION, &format!("client connected from {}", remote_addr))
        .await;
    info!(client = %client_id, conn_id, %remote_addr, state = %ConnectionState::Active, "session established");

    let reason = receive_loop(&ctx, &session, &mut reader, &mut shutdown_rx).await;

    ctx.registry.remove_session_if(&client_id, conn_id);
    session.close().await;
    ServerStats::incr(&ctx.stats.disconnects);
    ctx.audit_best_effort(&client_id, OP_DISCONNECTION, &reason.to_string()).await;
    info!(client = %client_id, conn_id, %reason, state = %ConnectionState::Closed, "session ended");
}

/// Read and answer the key exchange.
///
/// Nothing is registered here. The caller stores the key together with the
/// session before reading the client's first request.
async fn handshake(
    ctx: &ServerContext,
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut FrameWriter<BoxWriter>,
) -> Result<(String, rsv_crypto::PublicKey), ServerError> {
    let frame = tokio::time::timeout(ctx.config.handshake_timeout(), reader.read_frame())
        .await
        .map_err(|_| ServerError::Timeout("handshake"))??
        .ok_or_else(|| ServerError::ProtocolViolation("closed before key exchange".into()))?;

    let envelope = Envelope::from_bytes(&frame)
        .map_err(|e| ServerError::ProtocolViolation(format!("first frame is not an envelope: {}", e)))?;
    if envelope.is_signed() {
        return Err(ServerError::ProtocolViolation("key exchange must be unsigned".into()));
    }
    let request = KeyExchangeRequest::from_envelope(&envelope)
        .map_err(|e| ServerError::ProtocolViolation(e.to_string()))?;
    let public_key = CryptoEngine::import_public_key(&request.public_key).map_err(ServerError::KeyFormat)?;

    let reply = KeyExchangeResponse {
        server_public_key: ctx.crypto.export_public_key(),
    }
    .to_envelope()?
    .with_sender(ctx.config.server_id.clone());
    writer.write_frame(&reply.to_bytes()?).await?;

    debug!(client = %request.sender_id, "key exchange completed");
    Ok((request.sender_id, public_key))
}

async fn receive_loop(
    ctx: &ServerContext,
    session: &Session,
    reader: &mut FrameReader<OwnedReadHalf>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> DisconnectReason {
    let idle = ctx.config.idle_timeout();
    loop {
        let next = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => return DisconnectReason::Shutdown,
            next = read_next(reader, idle) => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => return DisconnectReason::PeerClosed,
            Err(ServerError::Timeout(_)) => return DisconnectReason::Idle,
            Err(e) => return DisconnectReason::Transport(e.to_string()),
        };
        ServerStats::incr(&ctx.stats.frames_received);

        match process_frame(ctx, session, &frame).await {
            Ok(FrameOutcome::Continue) => {}
            Ok(FrameOutcome::Disconnect) => return DisconnectReason::Requested,
            Err(e) if e.is_fatal() => return DisconnectReason::Transport(e.to_string()),
            Err(e) => warn!(client = session.id(), "frame failed: {}", e),
        }
    }
}

async fn read_next(
    reader: &mut FrameReader<OwnedReadHalf>,
    idle: Option<Duration>,
) -> Result<Option<Vec<u8>>, ServerError> {
    match idle {
        Some(limit) => Ok(tokio::time::timeout(limit, reader.read_frame())
            .await
            .map_err(|_| ServerError::Timeout("idle"))??),
        None => Ok(reader.read_frame().await?),
    }
}

enum FrameOutcome {
    Continue,
    Disconnect,
}

async fn process_frame(ctx: &ServerContext, session: &Session, frame: &[u8]) -> Result<FrameOutcome, ServerError> {
    let plaintext = match ctx.crypto.decrypt(frame) {
        Ok(plaintext) => plaintext,
        Err(e) => return Ok(plain_frame(ctx, session, frame, ServerError::Decryption(e))),
    };

    let envelope = match Envelope::from_bytes(&plaintext) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(client = session.id(), "decrypted frame is not an envelope: {}", e);
            return Ok(FrameOutcome::Continue);
        }
    };

    if let Err(e) = authenticate(ctx, session, &envelope) {
        ServerStats::incr(&ctx.stats.signature_failures);
        warn!(client = session.id(), action = %envelope.action, "rejected frame: {}", e);
        ctx.audit_best_effort(session.id(), OP_SECURITY, &e.to_string()).await;
        return Ok(FrameOutcome::Continue);
    }

    if envelope.is_action(ACTION_DISCONNECT) {
        return Ok(FrameOutcome::Disconnect);
    }

    dispatch(ctx, session, envelope).await?;
    Ok(FrameOutcome::Continue)
}

/// Handle a frame that is not ciphertext for this server. Only an unsigned
/// `Disconnect` is honoured.
fn plain_frame(ctx: &ServerContext, session: &Session, frame: &[u8], cause: ServerError) -> FrameOutcome {
    match Envelope::from_bytes(frame) {
        Ok(envelope) if envelope.is_action(ACTION_DISCONNECT) => {
            debug!(client = session.id(), "disconnect requested");
            FrameOutcome::Disconnect
        }
        Ok(envelope) => {
            ServerStats::incr(&ctx.stats.decryption_failures);
            warn!(client = session.id(), action = %envelope.action, "unencrypted frame discarded");
            FrameOutcome::Continue
        }
        Err(_) => {
            ServerStats::incr(&ctx.stats.decryption_failures);
            warn!(client = session.id(), "undecodable frame discarded: {}", cause);
            FrameOutcome::Continue
        }
    }
}
