//! rsv-client CLI entry point

use clap::Parser;
use rsv_client::cli::is_error_reply;
use rsv_client::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.execute().await {
        Ok(reply) => {
            let pretty = serde_json::from_str::<serde_json::Value>(&reply.data)
                .and_then(|value| serde_json::to_string_pretty(&value))
                .unwrap_or_else(|_| reply.data.clone());
            println!("{pretty}");
            if is_error_reply(&reply) {
                std::process::ExitCode::from(2)
            } else {
                std::process::ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
