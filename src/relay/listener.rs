// TCP accept loop

use crate::relay::broker::BrokerHandle;
use crate::relay::session::{Session, SessionId};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Accepts connections and starts one session per connection
pub struct Listener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    broker: BrokerHandle,
    next_id: u64,
}

impl Listener {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr, acceptor: TlsAcceptor, broker: BrokerHandle) -> Result<Self> {
        let tcp = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Self {
            tcp,
            acceptor,
            broker,
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp.local_addr().context("Listener has no local address")
    }

    /// Accept until `shutdown` fires. A failed accept is logged and the
    /// loop carries on.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!("Message server started on {}. Ready to accept connections", addr);
        }

        loop {
            let result = tokio::select! {
                result = self.tcp.accept() => result,
                _ = shutdown.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            };

            match result {
                Ok((stream, peer_addr)) => self.start_session(stream, peer_addr),
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }

    fn start_session(&mut self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let id = SessionId(self.next_id);
        self.next_id += 1;

        tracing::debug!(session = %id, peer = %peer_addr, "Accepted connection");

        let handshake = self.acceptor.accept(stream);
        let session = Session::new(id, peer_addr, self.broker.clone());
        tokio::spawn(session.run(handshake));
    }
}
