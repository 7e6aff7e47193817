//! rsv-server: authenticated, encrypted gateway in front of the reservation
//! resource API.
//!
//! Each client runs a key exchange, then sends signed (normally encrypted)
//! request envelopes. Verified requests are audited and relayed one at a
//! time; replies are signed with the server key and encrypted for the client.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

pub use audit::{AuditEntry, AuditError, AuditLog, JsonLinesAuditLog, MemoryAuditLog};
pub use config::{ConfigError, RelayMode, ServerConfig};
pub use error::ServerError;
pub use registry::ConnectionRegistry;
pub use relay::{HttpRelay, LocalRelay, Relay, RelayError};
pub use server::{ConnectionState, DisconnectReason, ProtocolServer, ServerContext, ServerHandle};
pub use session::{KeyRecord, Session, SessionInfo};
pub use stats::{ServerStats, ServerStatsSnapshot};
