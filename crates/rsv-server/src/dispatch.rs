//! Authentication and routing of decrypted request envelopes.

use rsv_crypto::CryptoEngine;
use rsv_proto::{Envelope, ErrorBody, MessageType, ResourceAction, ACTION_ERROR};
use tracing::{debug, error, warn};

use crate::audit::RESOURCE_API;
use crate::error::ServerError;
use crate::server::ServerContext;
use crate::session::Session;
use crate::stats::ServerStats;

/// Check that `envelope` was signed by the client that owns `session`.
///
/// The sender must be the session's own id and hold a registered key, and
/// the signature over `data` must verify against that key. Keys carried in
/// the message are never consulted.
pub fn authenticate(ctx: &ServerContext, session: &Session, envelope: &Envelope) -> Result<(), ServerError> {
    if envelope.sender_id != session.id() {
        return Err(ServerError::UnknownSender(format!(
            "{} (session belongs to {})",
            envelope.sender_id,
            session.id()
        )));
    }

    let key = ctx
        .registry()
        .lookup_key(&envelope.sender_id)
        .ok_or_else(|| ServerError::UnknownSender(envelope.sender_id.clone()))?;

    if !envelope.is_signed()
        || !CryptoEngine::verify_base64(envelope.data.as_bytes(), &envelope.signature, &key)
    {
        return Err(ServerError::SignatureMismatch(envelope.sender_id.clone()));
    }
    Ok(())
}

/// Run one authenticated request and answer it.
///
/// Holds the server-wide dispatch lock from the audit write until the reply
/// is written, so audit order and relay order agree across all sessions.
pub async fn dispatch(ctx: &ServerContext, session: &Session, request: Envelope) -> Result<(), ServerError> {
    let _guard = ctx.dispatch_lock.lock().await;
    ServerStats::incr(&ctx.stats().dispatched);

    let reply = match ctx
        .audit()
        .log_operation(session.id(), &request.action, RESOURCE_API, &request.data)
        .await
    {
        Ok(_) => route(ctx, session, &request).await,
        Err(e) => {
            error!(client = session.id(), action = %request.action, "audit write failed, refusing: {}", e);
            Envelope::response(
                request.action.clone(),
                ErrorBody::new(ServerError::Audit(e).to_string()).to_json(),
            )
        }
    };

    send_sealed(ctx, session, reply).await
}

async fn route(ctx: &ServerContext, session: &Session, request: &Envelope) -> Envelope {
    let Some(action) = ResourceAction::parse(&request.action) else {
        debug!(client = session.id(), action = %request.action, "unknown command");
        return Envelope::new(
            MessageType::Error,
            ACTION_ERROR,
            ErrorBody::new("unknown command").to_json(),
        );
    };

    let forward = ctx.relay().forward(action, &request.data, session.id());
    let body = match tokio::time::timeout(ctx.config().relay_timeout(), forward).await {
        Ok(body) => body,
        Err(_) => {
            warn!(client = session.id(), %action, "relay timed out");
            ErrorBody::new(ServerError::Timeout("relay").to_string()).to_json()
        }
    };
    Envelope::response(request.action.clone(), body)
}

/// Sign `envelope` with the server key, encrypt it for the session's client
/// and write it.
pub async fn send_sealed(ctx: &ServerContext, session: &Session, mut envelope: Envelope) -> Result<(), ServerError> {
    envelope.sender_id = ctx.config().server_id.clone();
    envelope.signature = ctx
        .crypto()
        .sign_base64(envelope.data.as_bytes())
        .map_err(ServerError::Encryption)?;

    let plaintext = envelope.to_bytes()?;
    let ciphertext = ctx
        .crypto()
        .encrypt(&plaintext, session.public_key())
        .map_err(ServerError::Encryption)?;

    session.send(&ciphertext).await?;
    debug!(client = session.id(), action = %envelope.action, "reply sent");
    Ok(())
}
