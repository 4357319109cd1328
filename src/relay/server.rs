// Running relay server: broker + listener

use crate::relay::broker::{Broker, BrokerHandle};
use crate::relay::config::ServerConfig;
use crate::relay::listener::Listener;
use crate::relay::tls;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// A running relay server
pub struct RelayServer {
    local_addr: SocketAddr,
    broker_handle: BrokerHandle,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Load the TLS files named in `config` and start serving.
    ///
    /// Fails before accepting anything if the certificate or key cannot be
    /// loaded, or the port cannot be bound.
    pub async fn start(config: &ServerConfig) -> Result<Self> {
        let acceptor = tls::acceptor_from_files(&config.cert_path, &config.key_path)
            .context("Failed to load TLS certificate and key")?;

        Self::with_acceptor(config.listen_addr(), acceptor).await
    }

    /// Start serving on `addr` with a ready acceptor
    pub async fn with_acceptor(addr: SocketAddr, acceptor: TlsAcceptor) -> Result<Self> {
        let (broker, handle) = Broker::new();
        let listener = Listener::bind(addr, acceptor, handle.clone()).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        // Spawn broker task
        tokio::spawn(async move {
            broker.run().await;
        });

        // Spawn listener task
        let listener_shutdown = shutdown.clone();
        tokio::spawn(async move {
            listener.run(listener_shutdown).await;
        });

        Ok(Self {
            local_addr,
            broker_handle: handle,
            shutdown,
        })
    }

    /// Address actually bound, useful when the configured port is 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> BrokerHandle {
        self.broker_handle.clone()
    }

    /// Stop accepting and close every session
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.broker_handle
            .shutdown()
            .context("Failed to send shutdown command")
    }
}
