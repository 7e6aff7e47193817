//! Registered client keys and live sessions.

use std::sync::Arc;

use dashmap::DashMap;
use rsv_crypto::PublicKey;
use tracing::debug;

use crate::session::{KeyRecord, Session, SessionInfo};

/// Concurrent map of client id to key record and session.
///
/// Both maps are sharded, so operations on different ids do not contend.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    keys: DashMap<String, KeyRecord>,
    sessions: DashMap<String, Arc<Session>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `public_key` for `id` on behalf of connection `conn_id`,
    /// replacing any previous record.
    pub fn register(&self, id: &str, conn_id: u64, public_key: PublicKey) {
        if self.keys.insert(id.to_string(), KeyRecord::new(id, conn_id, public_key)).is_some() {
            debug!(client = id, conn_id, "public key replaced");
        }
    }

    pub fn lookup_key(&self, id: &str) -> Option<PublicKey> {
        self.keys.get(id).map(|record| record.public_key.clone())
    }

    pub fn key_record(&self, id: &str) -> Option<KeyRecord> {
        self.keys.get(id).map(|record| record.clone())
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    /// Store `session` and its key record, returning the session it replaced.
    ///
    /// The key is written first and tagged with the session's connection, so
    /// a stale teardown racing this call cannot remove it.
    pub fn add_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.register(session.id(), session.conn_id(), session.public_key().clone());
        self.sessions.insert(session.id().to_string(), session)
    }

    /// Remove the session and key record of `id`.
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        self.keys.remove(id);
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove the session and key of `id` only where they belong to
    /// connection `conn_id`.
    ///
    /// A client that reconnected keeps its new session and key.
    pub fn remove_session_if(&self, id: &str, conn_id: u64) -> Option<Arc<Session>> {
        self.keys.remove_if(id, |_, record| record.conn_id == conn_id);
        self.sessions
            .remove_if(id, |_, session| session.conn_id() == conn_id)
            .map(|(_, session)| session)
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// All live sessions, for broadcast.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|entry| entry.value().info()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session and key record.
    pub fn clear(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions();
        self.sessions.clear();
        self.keys.clear();
        sessions
    }
}
