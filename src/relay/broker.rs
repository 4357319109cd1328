// Message broker: sole owner of the registry, fans messages out to peers

use crate::relay::error::SessionError;
use crate::relay::registry::{Peer, Registry, SessionInfo};
use crate::relay::session::SessionId;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Handle for communicating with the broker
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    pub fn new(tx: mpsc::UnboundedSender<BrokerCommand>) -> Self {
        Self { tx }
    }

    /// Send a command to the broker
    pub fn send_command(&self, cmd: BrokerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .context("Failed to send command to broker")
    }

    /// Snapshot of the registry, in connection order
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send_command(BrokerCommand::Sessions { reply })?;
        rx.await.context("Broker stopped before answering")
    }

    /// Stop the broker and every session it owns
    pub fn shutdown(&self) -> Result<()> {
        self.send_command(BrokerCommand::Shutdown)
    }
}

/// Commands that can be sent to the broker
#[derive(Debug)]
pub enum BrokerCommand {
    /// A session was accepted and is starting its handshake
    Register {
        id: SessionId,
        peer_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Arc<[u8]>>,
        closed: CancellationToken,
    },
    /// The session's TLS handshake succeeded
    HandshakeComplete { id: SessionId },
    /// The session declared its name
    Named { id: SessionId, name: Vec<u8> },
    /// Relay an already formatted payload to everyone but `from`
    Broadcast { from: SessionId, payload: Arc<[u8]> },
    /// The session hit a terminal error
    Disconnected { id: SessionId, cause: SessionError },
    /// Report the current registry contents
    Sessions {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    /// Shutdown the broker
    Shutdown,
}

/// Owns the registry and applies commands one at a time.
///
/// Every registry mutation happens here, in command order, so a removal can
/// never interleave with a fan-out in progress.
pub struct Broker {
    registry: Registry,
    rx: mpsc::UnboundedReceiver<BrokerCommand>,
}

impl Broker {
    /// Create a new broker
    pub fn new() -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let broker = Self {
            registry: Registry::new(),
            rx,
        };

        (broker, BrokerHandle::new(tx))
    }

    /// Run the broker event loop
    pub async fn run(mut self) {
        tracing::info!("Message broker started");

        while let Some(cmd) = self.rx.recv().await {
            if !self.handle_command(cmd) {
                tracing::info!("Broker shutting down");
                break;
            }
        }

        self.registry.close_all();
        tracing::info!("Message broker stopped");
    }

    /// Apply one command. Returns false once the broker should stop.
    fn handle_command(&mut self, cmd: BrokerCommand) -> bool {
        match cmd {
            BrokerCommand::Register {
                id,
                peer_addr,
                outbound,
                closed,
            } => {
                if self.registry.add(id, Peer::new(peer_addr, outbound, closed)) {
                    tracing::info!(session = %id, peer = %peer_addr, "New client connected");
                    self.log_connected();
                }
            }
            BrokerCommand::HandshakeComplete { id } => {
                self.registry.handshake_complete(id);
            }
            BrokerCommand::Named { id, name } => {
                if self.registry.set_name(id, name) {
                    self.log_connected();
                }
            }
            BrokerCommand::Broadcast { from, payload } => {
                // The sender may have been dropped after queueing this
                if !self.registry.contains(from) {
                    tracing::debug!(session = %from, "Dropping message from removed session");
                    return true;
                }

                let out = self.registry.fan_out(from, &payload);
                tracing::debug!(
                    session = %from,
                    delivered = out.delivered.len(),
                    "Message relayed"
                );

                for id in &out.dropped {
                    tracing::info!(session = %id, "Removed client with closed writer");
                }
                if !out.dropped.is_empty() {
                    self.log_connected();
                }
            }
            BrokerCommand::Disconnected { id, cause } => {
                if self.registry.remove(id).is_some() {
                    tracing::info!(session = %id, "Client disconnected: {}", cause);
                    self.log_connected();
                } else {
                    tracing::debug!(session = %id, "Already removed: {}", cause);
                }
            }
            BrokerCommand::Sessions { reply } => {
                let _ = reply.send(self.registry.sessions());
            }
            BrokerCommand::Shutdown => return false,
        }

        true
    }

    fn log_connected(&self) {
        tracing::info!(
            count = self.registry.len(),
            "Connected clients: [{}]",
            self.registry.describe()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::SessionState;
    use std::io;

    fn register(
        broker: &mut Broker,
        id: u64,
    ) -> (mpsc::UnboundedReceiver<Arc<[u8]>>, CancellationToken) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        assert!(broker.handle_command(BrokerCommand::Register {
            id: SessionId(id),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 5000 + id as u16)),
            outbound,
            closed: closed.clone(),
        }));
        (rx, closed)
    }

    fn name(broker: &mut Broker, id: u64, name: &str) {
        broker.handle_command(BrokerCommand::HandshakeComplete { id: SessionId(id) });
        broker.handle_command(BrokerCommand::Named {
            id: SessionId(id),
            name: name.as_bytes().to_vec(),
        });
    }

    fn broadcast(broker: &mut Broker, from: u64, payload: &[u8]) {
        broker.handle_command(BrokerCommand::Broadcast {
            from: SessionId(from),
            payload: Arc::from(payload),
        });
    }

    #[test]
    fn test_disconnect_removes_exactly_once() {
        let (mut broker, _handle) = Broker::new();
        let (_rx, closed) = register(&mut broker, 1);

        broker.handle_command(BrokerCommand::Disconnected {
            id: SessionId(1),
            cause: SessionError::PeerClosed,
        });
        assert!(broker.registry.is_empty());
        assert!(closed.is_cancelled());

        // A late report from the writer is ignored
        broker.handle_command(BrokerCommand::Disconnected {
            id: SessionId(1),
            cause: SessionError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
        });
        assert!(broker.registry.is_empty());
    }

    #[test]
    fn test_broadcast_order_per_sender() {
        let (mut broker, _handle) = Broker::new();
        let (_a_rx, _) = register(&mut broker, 1);
        let (mut b_rx, _) = register(&mut broker, 2);
        name(&mut broker, 1, "alice");
        name(&mut broker, 2, "bob");

        broadcast(&mut broker, 1, b"alice: A");
        broadcast(&mut broker, 1, b"alice: B");

        assert_eq!(&b_rx.try_recv().unwrap()[..], b"alice: A");
        assert_eq!(&b_rx.try_recv().unwrap()[..], b"alice: B");
    }

    #[test]
    fn test_no_history_for_late_joiners() {
        let (mut broker, _handle) = Broker::new();
        let (_a_rx, _) = register(&mut broker, 1);
        name(&mut broker, 1, "alice");
        broadcast(&mut broker, 1, b"alice: early");

        let (mut c_rx, _) = register(&mut broker, 3);
        name(&mut broker, 3, "carol");

        assert!(c_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_from_removed_sender_is_dropped() {
        let (mut broker, _handle) = Broker::new();
        let (_a_rx, _) = register(&mut broker, 1);
        let (mut b_rx, _) = register(&mut broker, 2);
        name(&mut broker, 1, "alice");
        name(&mut broker, 2, "bob");

        broker.handle_command(BrokerCommand::Disconnected {
            id: SessionId(1),
            cause: SessionError::PeerClosed,
        });
        broadcast(&mut broker, 1, b"alice: ghost");

        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broker_sessions_and_shutdown() {
        let (broker, handle) = Broker::new();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let task = tokio::spawn(broker.run());

        handle
            .send_command(BrokerCommand::Register {
                id: SessionId(1),
                peer_addr: "127.0.0.1:6000".parse().unwrap(),
                outbound,
                closed: closed.clone(),
            })
            .unwrap();

        let sessions = handle.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Handshaking);

        handle.shutdown().unwrap();
        task.await.unwrap();

        assert!(closed.is_cancelled());
        assert!(handle.sessions().await.is_err());
    }
}
