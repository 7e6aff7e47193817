//! Framing for the rsv gateway.
//!
//! Every message on the socket is one frame: a 4-byte big-endian length
//! followed by that many payload bytes.

pub mod framing;
pub mod stream;

pub use framing::*;
pub use stream::*;
