use thiserror::Error;

use crate::validation::ValidationError;

/// Errors raised while decoding wire documents.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field: {0}")]
    InvalidField(#[from] ValidationError),

    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: String },
}
