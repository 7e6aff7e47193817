//! Key material and message protection for the rsv gateway.
//!
//! Both ends of a connection hold one [`CryptoEngine`]. Payloads small enough
//! for RSA-OAEP are encrypted directly; anything larger is wrapped in a
//! [`hybrid::HybridFrame`] carrying a one-off AES-256-CBC key.

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod hybrid;

#[cfg(test)]
mod proptests;

pub use engine::{CryptoEngine, PublicKey, KEY_BITS};
pub use error::CryptoError;
pub use hybrid::HybridFrame;
