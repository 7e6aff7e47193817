//! rsv-client: connects to the rsv gateway, exchanges keys and sends signed,
//! encrypted reservation requests. Replies arrive through a
//! [`SessionObserver`].

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod observer;

pub use cli::{Cli, Commands};
pub use client::ProtocolClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use observer::{ChannelObserver, ClientEvent, ConnectionStatus, LoggingObserver, SessionObserver};
