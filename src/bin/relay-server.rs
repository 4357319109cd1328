// TLS chat relay server binary

use clap::Parser;
use tlsrelay::relay::{RelayServer, ServerCli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tlsrelay=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments; a missing port prints usage and exits non-zero
    let config = ServerCli::parse().into_config();

    let server = match RelayServer::start(&config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");
    server.shutdown()?;

    Ok(())
}
