//! Per-client state shared between the connection task and the registry.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use rsv_crypto::PublicKey;
use rsv_transport::{FrameWriter, FramingError};
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

/// Write half of a session transport.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A client's registered public key, tagged with the connection that
/// registered it.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub owner_id: String,
    pub conn_id: u64,
    pub public_key: PublicKey,
    pub registered_at: DateTime<Utc>,
}

impl KeyRecord {
    pub fn new(owner_id: impl Into<String>, conn_id: u64, public_key: PublicKey) -> Self {
        Self {
            owner_id: owner_id.into(),
            conn_id,
            public_key,
            registered_at: Utc::now(),
        }
    }
}

/// An authenticated connection.
///
/// `conn_id` is unique per accepted socket, so a reconnect under the same
/// client id can be told apart from the connection it replaced.
pub struct Session {
    id: String,
    conn_id: u64,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    /// Key replies are encrypted for, fixed at handshake time.
    public_key: PublicKey,
    writer: Mutex<FrameWriter<BoxWriter>>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        conn_id: u64,
        remote_addr: SocketAddr,
        public_key: PublicKey,
        writer: FrameWriter<BoxWriter>,
    ) -> Self {
        Self {
            id: id.into(),
            conn_id,
            remote_addr,
            connected_at: Utc::now(),
            public_key,
            writer: Mutex::new(writer),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Write one frame. Frames from concurrent senders never interleave.
    pub async fn send(&self, frame: &[u8]) -> Result<(), FramingError> {
        self.writer.lock().await.write_frame(frame).await
    }

    /// Close the write direction of the transport.
    pub async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            conn_id: self.conn_id,
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("conn_id", &self.conn_id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a session for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub conn_id: u64,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}
