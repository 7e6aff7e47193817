use rsv_store::config::ApiConfig;
use rsv_store::ApiServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = if let Ok(path) = std::env::var("RSV_API_CONFIG_PATH") {
        ApiConfig::from_toml(path)?
    } else {
        ApiConfig::from_env()?
    };

    let server = ApiServer::bind(&config).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown.send(true);
    });

    server.run().await
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
