//! Forwarding of authenticated operations to the resource API.
//!
//! A relay always answers with a response body. Failures of any kind are
//! turned into an [`ErrorBody`] so the client sees them as data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use rsv_proto::{ErrorBody, IdLookup, Reservation, ResourceAction};
use rsv_store::{ReservationStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("http error: {0}")]
    Http(String),
    #[error("bad payload for {action}: {reason}")]
    Payload {
        action: ResourceAction,
        reason: String,
    },
    #[error("api returned {status}: {message}")]
    BadResponse { status: u16, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("response encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Error body handed back to the client.
    pub fn to_body(&self) -> String {
        match self {
            RelayError::BadResponse { message, .. } => ErrorBody::new(message.clone()).to_json(),
            other => ErrorBody::new(other.to_string()).to_json(),
        }
    }
}

/// Forwards `(action, payload, sender)` to wherever reservations live.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn forward(&self, action: ResourceAction, payload: &str, sender_id: &str) -> String;
}

/// Id addressed by a single-record action.
///
/// `get` and `delete` carry `{"id": n}`; `update` carries the full record.
pub fn target_id(action: ResourceAction, payload: &str) -> Result<Option<i64>, RelayError> {
    let bad = |reason: String| RelayError::Payload { action, reason };
    match action {
        ResourceAction::Get | ResourceAction::Delete => {
            let lookup: IdLookup = serde_json::from_str(payload).map_err(|e| bad(e.to_string()))?;
            Ok(Some(lookup.id))
        }
        ResourceAction::Update => {
            let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| bad(e.to_string()))?;
            value
                .get("id")
                .and_then(serde_json::Value::as_i64)
                .map(Some)
                .ok_or_else(|| bad("missing numeric id".into()))
        }
        ResourceAction::List | ResourceAction::Create => Ok(None),
    }
}

/// Relay speaking to the REST resource API.
#[derive(Clone)]
pub struct HttpRelay {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, id: Option<i64>) -> String {
        match id {
            Some(id) => format!("{}/api/reservations/{}", self.base_url, id),
            None => format!("{}/api/reservations", self.base_url),
        }
    }

    async fn send(&self, action: ResourceAction, payload: &str, sender_id: &str) -> Result<String, RelayError> {
        let id = target_id(action, payload)?;
        let method = match action {
            ResourceAction::Create => Method::POST,
            ResourceAction::Update => Method::PUT,
            ResourceAction::Delete => Method::DELETE,
            ResourceAction::Get | ResourceAction::List => Method::GET,
        };

        let mut request = self
            .client
            .request(method, self.resource_url(id))
            .header("X-Client-Id", sender_id);
        if action.has_body() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.to_string());
        }

        let resp = request.send().await.map_err(|e| RelayError::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| RelayError::Http(e.to_string()))?;

        if !status.is_success() {
            let message = ErrorBody::parse(&body)
                .map(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(RelayError::BadResponse {
                status: status.as_u16(),
                message,
            });
        }

        if status == StatusCode::NO_CONTENT || body.is_empty() {
            // Deletes answer with no content; echo the id instead.
            return Ok(serde_json::to_string(&IdLookup { id: id.unwrap_or_default() })?);
        }
        Ok(body)
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn forward(&self, action: ResourceAction, payload: &str, sender_id: &str) -> String {
        match self.send(action, payload, sender_id).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%action, sender_id, "relay failed: {}", e);
                e.to_body()
            }
        }
    }
}

/// Relay calling a [`ReservationStore`] in the same process.
#[derive(Debug, Clone)]
pub struct LocalRelay {
    store: Arc<ReservationStore>,
}

impl LocalRelay {
    pub fn new(store: Arc<ReservationStore>) -> Self {
        Self { store }
    }

    async fn apply(&self, action: ResourceAction, payload: &str) -> Result<String, RelayError> {
        let id = target_id(action, payload)?;
        let record = |payload: &str| -> Result<Reservation, RelayError> {
            serde_json::from_str(payload).map_err(|e| RelayError::Payload {
                action,
                reason: e.to_string(),
            })
        };

        let body = match (action, id) {
            (ResourceAction::List, _) => serde_json::to_string(&self.store.list().await)?,
            (ResourceAction::Create, _) => serde_json::to_string(&self.store.create(record(payload)?).await?)?,
            (ResourceAction::Get, Some(id)) => serde_json::to_string(&self.store.get(id).await?)?,
            (ResourceAction::Update, Some(id)) => {
                serde_json::to_string(&self.store.update(id, record(payload)?).await?)?
            }
            (ResourceAction::Delete, Some(id)) => {
                self.store.delete(id).await?;
                serde_json::to_string(&IdLookup { id })?
            }
            (action, None) => {
                return Err(RelayError::Payload {
                    action,
                    reason: "missing id".into(),
                })
            }
        };
        Ok(body)
    }
}

#[async_trait]
impl Relay for LocalRelay {
    async fn forward(&self, action: ResourceAction, payload: &str, sender_id: &str) -> String {
        match self.apply(action, payload).await {
            Ok(body) => {
                debug!(%action, sender_id, "local relay ok");
                body
            }
            Err(e) => {
                debug!(%action, sender_id, "local relay rejected: {}", e);
                e.to_body()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANA: &str = r#"{"customerName":"Ana","reservationDateTime":"2024-06-01T20:00","numberOfGuests":2,"tableNumber":5}"#;

    #[test]
    fn test_target_id() {
        assert_eq!(target_id(ResourceAction::Get, r#"{"id":7}"#).unwrap(), Some(7));
        assert_eq!(target_id(ResourceAction::List, "").unwrap(), None);
        assert_eq!(target_id(ResourceAction::Update, r#"{"id":3,"customerName":"x"}"#).unwrap(), Some(3));
        assert!(target_id(ResourceAction::Update, ANA).is_err());
        assert!(target_id(ResourceAction::Delete, "nope").is_err());
    }

    #[test]
    fn test_resource_urls() {
        let relay = HttpRelay::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(relay.resource_url(None), "http://localhost:5000/api/reservations");
        assert_eq!(relay.resource_url(Some(4)), "http://localhost:5000/api/reservations/4");
    }

    #[tokio::test]
    async fn test_local_relay_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReservationStore::open(dir.path().join("r.json")).await.unwrap());
        let relay = LocalRelay::new(store);

        let created: Reservation =
            serde_json::from_str(&relay.forward(ResourceAction::Create, ANA, "c1").await).unwrap();
        assert_eq!(created.id, 1);

        let conflict = relay.forward(ResourceAction::Create, ANA, "c2").await;
        assert!(ErrorBody::parse(&conflict).is_some());

        let fetched: Reservation =
            serde_json::from_str(&relay.forward(ResourceAction::Get, r#"{"id":1}"#, "c2").await).unwrap();
        assert_eq!(fetched, created);

        assert_eq!(relay.forward(ResourceAction::Delete, r#"{"id":1}"#, "c1").await, r#"{"id":1}"#);
        let missing = relay.forward(ResourceAction::Get, r#"{"id":1}"#, "c1").await;
        assert!(ErrorBody::parse(&missing).unwrap().message.contains("not found"));
    }

    #[tokio::test]
    async fn test_http_relay_unreachable_api() {
        // Nothing listens on port 1.
        let relay = HttpRelay::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let body = relay.forward(ResourceAction::List, "", "c1").await;
        assert!(ErrorBody::parse(&body).is_some());
    }
}
