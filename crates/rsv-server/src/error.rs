use rsv_crypto::CryptoError;
use rsv_proto::ProtoError;
use rsv_transport::FramingError;
use thiserror::Error;

use crate::audit::AuditError;

/// Errors raised while serving a connection.
///
/// Only `Transport`, `ProtocolViolation`, `KeyFormat` and `Timeout` end a
/// connection. The remaining kinds are per-frame and leave it open.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] FramingError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("bad public key: {0}")]
    KeyFormat(CryptoError),

    #[error("decryption failed: {0}")]
    Decryption(CryptoError),

    #[error("encryption failed: {0}")]
    Encryption(CryptoError),

    #[error("malformed envelope: {0}")]
    Proto(#[from] ProtoError),

    #[error("signature mismatch for {0}")]
    SignatureMismatch(String),

    #[error("unknown sender {0}")]
    UnknownSender(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),
}

impl ServerError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::Transport(_)
                | ServerError::ProtocolViolation(_)
                | ServerError::KeyFormat(_)
                | ServerError::Timeout(_)
        )
    }
}
