//! REST resource API over the reservation store.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rsv_proto::{ErrorBody, Reservation};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::store::{ReservationStore, StoreError};

/// Header carrying the gateway client on whose behalf a request is made.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReservationStore>,
}

/// Build the API router.
pub fn router(store: Arc<ReservationStore>) -> Router {
    Router::new()
        .route("/api/reservations", get(list_reservations).post(create_reservation))
        .route(
            "/api/reservations/:id",
            get(get_reservation)
                .put(update_reservation)
                .delete(delete_reservation),
        )
        .route("/health", get(get_health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState { store })
}

/// Store failure rendered as a status code plus [`ErrorBody`].
pub struct ApiError(StatusCode, String);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("store failure: {}", e);
        }
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody::new(self.1))).into_response()
    }
}

fn parse_body(body: &Bytes) -> Result<Reservation, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("malformed reservation: {e}")))
}

fn client_id(headers: &HeaderMap) -> &str {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

// GET /api/reservations
pub async fn list_reservations(State(state): State<AppState>, headers: HeaderMap) -> Response {
    debug!(client = client_id(&headers), "list reservations");
    Json(state.store.list().await).into_response()
}

// GET /api/reservations/:id
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Reservation>, ApiError> {
    debug!(client = client_id(&headers), id, "get reservation");
    Ok(Json(state.store.get(id).await?))
}

// POST /api/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let reservation = parse_body(&body)?;
    let created = state.store.create(reservation).await?;
    debug!(client = client_id(&headers), id = created.id, "reservation created");
    Ok((StatusCode::CREATED, Json(created)))
}

// PUT /api/reservations/:id
pub async fn update_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = parse_body(&body)?;
    let updated = state.store.update(id, reservation).await?;
    debug!(client = client_id(&headers), id, "reservation updated");
    Ok(Json(updated))
}

// DELETE /api/reservations/:id
pub async fn delete_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.store.delete(id).await?;
    debug!(client = client_id(&headers), id, "reservation deleted");
    Ok(StatusCode::NO_CONTENT)
}

// GET /health
pub async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
