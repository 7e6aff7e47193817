//! CLI argument parsing and command dispatch

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use rsv_proto::reservation::slot_time;
use rsv_proto::{Envelope, ErrorBody, MessageType, Reservation};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ProtocolClient;
use crate::config::ClientConfig;
use crate::observer::{ChannelObserver, ClientEvent, ConnectionStatus};

/// Reservation client for the rsv gateway
#[derive(Parser, Debug)]
#[command(name = "rsv-client", version, about = "Reservation client for the rsv gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Gateway address (host:port)
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// Client id presented to the gateway
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// TOML config file (otherwise RSV_* environment variables)
    #[arg(long, short = 'c', global = true, env = "RSV_CLIENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the reply
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,

    /// Send the request signed but unencrypted
    #[arg(long, global = true)]
    pub plain: bool,

    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all reservations
    List,
    /// Show one reservation
    Get {
        id: i64,
    },
    /// Create a reservation
    Create(ReservationArgs),
    /// Replace a reservation
    Update {
        id: i64,
        #[command(flatten)]
        reservation: ReservationArgs,
    },
    /// Delete a reservation
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ReservationArgs {
    /// Customer name
    #[arg(long)]
    pub name: String,

    /// Slot start, e.g. 2024-06-01T20:00
    #[arg(long, value_parser = parse_slot)]
    pub at: NaiveDateTime,

    /// Party size
    #[arg(long)]
    pub guests: i32,

    /// Table number
    #[arg(long)]
    pub table: i32,

    #[arg(long, default_value = "")]
    pub phone: String,

    /// Free-text special requests
    #[arg(long)]
    pub requests: Option<String>,

    #[arg(long)]
    pub confirmed: bool,
}

impl ReservationArgs {
    pub fn to_reservation(&self, id: i64) -> Reservation {
        let mut reservation = Reservation::new(self.name.clone(), self.at, self.guests, self.table);
        reservation.id = id;
        reservation.phone_number = self.phone.clone();
        reservation.special_requests = self.requests.clone();
        reservation.is_confirmed = self.confirmed;
        reservation
    }
}

fn parse_slot(s: &str) -> Result<NaiveDateTime, String> {
    slot_time::parse(s).ok_or_else(|| format!("expected YYYY-MM-DDTHH:MM[:SS], got {s}"))
}

impl Cli {
    /// Resolve the client configuration: file or environment, then flags.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_toml(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => ClientConfig::from_env()?,
        };
        if let Some(server) = &self.server {
            config.server_addr = server.clone();
        }
        if let Some(id) = &self.client_id {
            config.client_id = id.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Connect, send the command and wait for its reply.
    pub async fn execute(self) -> anyhow::Result<Envelope> {
        let config = self.client_config()?;
        let (observer, mut events) = ChannelObserver::new();
        let client = ProtocolClient::connect(config, Arc::new(observer)).await?;

        let encrypt = !self.plain;
        let sent = match &self.command {
            Commands::List => client.send(Envelope::request("list", "{}"), encrypt).await,
            Commands::Get { id } => client.send(lookup("get", *id)?, encrypt).await,
            Commands::Create(args) => client.send(record("create", &args.to_reservation(0))?, encrypt).await,
            Commands::Update { id, reservation } => {
                client
                    .send(record("update", &reservation.to_reservation(*id))?, encrypt)
                    .await
            }
            Commands::Delete { id } => client.send(lookup("delete", *id)?, encrypt).await,
        };

        let reply = match sent {
            Ok(()) => wait_for_reply(&mut events, Duration::from_secs(self.timeout)).await,
            Err(e) => Err(e.into()),
        };
        client.disconnect().await?;
        reply
    }
}

fn lookup(action: &str, id: i64) -> anyhow::Result<Envelope> {
    Ok(Envelope::with_payload(MessageType::Request, action, &rsv_proto::IdLookup { id })?)
}

fn record(action: &str, reservation: &Reservation) -> anyhow::Result<Envelope> {
    Ok(Envelope::with_payload(MessageType::Request, action, reservation)?)
}

/// Wait for the first reply, skipping notifications.
pub async fn wait_for_reply(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    limit: Duration,
) -> anyhow::Result<Envelope> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for reply")?;
        match event {
            Some(ClientEvent::Message {
                envelope,
                signature_valid,
            }) => {
                if envelope.msg_type == MessageType::Notification {
                    debug!(action = %envelope.action, "notification: {}", envelope.data);
                    continue;
                }
                if !signature_valid {
                    bail!("reply signature did not verify against the server key");
                }
                return Ok(envelope);
            }
            Some(ClientEvent::Error(message)) => warn!("{}", message),
            Some(ClientEvent::Status(ConnectionStatus::ConnectionLost)) | None => {
                bail!("connection lost before reply")
            }
            Some(ClientEvent::Status(status)) => debug!(%status, "status"),
        }
    }
}

/// Whether a reply body reports a failure.
pub fn is_error_reply(envelope: &Envelope) -> bool {
    envelope.msg_type == MessageType::Error || ErrorBody::parse(&envelope.data).is_some()
}
