//! Reservation record store and the REST API that exposes it.

pub mod api;
pub mod config;
pub mod server;
pub mod store;

pub use api::router;
pub use server::ApiServer;
pub use store::{ReservationStore, StoreError};
