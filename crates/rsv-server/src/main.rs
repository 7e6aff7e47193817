//! rsv-server: reservation gateway binary

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rsv_crypto::CryptoEngine;
use rsv_server::{
    AuditLog, HttpRelay, JsonLinesAuditLog, LocalRelay, ProtocolServer, Relay, RelayMode, ServerConfig,
};
use rsv_store::ReservationStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    info!(server_id = %config.server_id, relay_mode = ?config.relay_mode, "starting rsv-server");

    let crypto = CryptoEngine::generate()?;
    let audit: Arc<dyn AuditLog> = Arc::new(JsonLinesAuditLog::open(&config.audit_log_path).await?);
    let relay: Arc<dyn Relay> = match config.relay_mode {
        RelayMode::Http => Arc::new(HttpRelay::new(config.api_base_url.clone(), config.relay_timeout())?),
        RelayMode::Local => Arc::new(LocalRelay::new(Arc::new(
            ReservationStore::open(&config.data_path).await?,
        ))),
    };

    let server = ProtocolServer::bind(config, crypto, audit, relay).await?;
    let handle = server.handle()?;
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).ok()
    };

    tokio::select! {
        _ = async {
            #[cfg(unix)]
            {
                match sigterm {
                    Some(ref mut sigterm) => {
                        sigterm.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, starting graceful shutdown");
        }
    }
}
