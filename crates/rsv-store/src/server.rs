use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::api::router;
use crate::config::ApiConfig;
use crate::store::ReservationStore;

pub struct ApiServer {
    listener: TcpListener,
    store: Arc<ReservationStore>,
    shutdown_tx: watch::Sender<bool>,
}

impl ApiServer {
    /// Open the store and bind the listening socket.
    pub async fn bind(config: &ApiConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = Arc::new(ReservationStore::open(&config.data_path).await?);
        Self::bind_with_store(config.bind_addr, store).await
    }

    pub async fn bind_with_store(addr: SocketAddr, store: Arc<ReservationStore>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            store,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops [`run`](Self::run) when `true` is sent.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        info!("rsv-api listening on {} (data: {})", addr, self.store.path().display());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(self.listener, router(self.store))
            .with_graceful_shutdown(async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                info!("rsv-api shutting down");
            })
            .await?;
        Ok(())
    }
}
