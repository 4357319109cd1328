// TLS chat relay client binary

use anyhow::{Context, Result};
use clap::Parser;
use tlsrelay::relay::{tls, ChatClient, ClientCli, ClientConfig};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ask for a value on stdout and read one non-empty line
async fn prompt(lines: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<String> {
    loop {
        println!("{}", question);
        let line = lines
            .next_line()
            .await?
            .context("Input closed before a value was entered")?;
        let value = line.trim();
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }
}

async fn resolve_config(cli: ClientCli, lines: &mut Lines<BufReader<Stdin>>) -> Result<ClientConfig> {
    let name = match cli.name {
        Some(name) => name,
        None => prompt(lines, "Please enter your name:").await?,
    };
    let host = match cli.host {
        Some(host) => host,
        None => prompt(lines, "Please enter the IP address of the server you want to connect to:").await?,
    };
    let port = match cli.port {
        Some(port) => port,
        None => prompt(lines, "Please enter the port number of the server you want to connect to:")
            .await?
            .parse()
            .context("Invalid port number")?,
    };

    Ok(ClientConfig {
        name,
        host,
        port,
        ca_path: cli.ca,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tlsrelay=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = ClientCli::parse();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let config = resolve_config(cli, &mut lines).await?;

    let connector = tls::connector_from_file(&config.ca_path)
        .with_context(|| format!("Error loading certificate {:?}", config.ca_path))?;

    let client = ChatClient::connect(&config.host, config.port, &config.name, &connector).await?;
    println!("Connected to {}:{} as {}", config.host, config.port, config.name);

    // Hand the remaining stdin to the pump
    let stdin = lines.into_inner();
    client.pump(stdin, tokio::io::stdout()).await
}
