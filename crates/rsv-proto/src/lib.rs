//! Wire format definitions for the rsv reservation gateway.
//!
//! Everything exchanged on the socket is a JSON [`Envelope`]. The `data`
//! field carries a second JSON document whose shape depends on the action:
//! handshake payloads, a [`Reservation`], an [`IdLookup`] or an [`ErrorBody`].

#![forbid(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod handshake;
pub mod reservation;
pub mod validation;

pub use envelope::{Envelope, MessageType, ResourceAction, ACTION_DISCONNECT, ACTION_ERROR, ACTION_KEY_EXCHANGE};
pub use error::ProtoError;
pub use handshake::{DisconnectPayload, KeyExchangeRequest, KeyExchangeResponse};
pub use reservation::{ErrorBody, IdLookup, Reservation};
pub use validation::ValidationError;
