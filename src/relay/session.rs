// Per-connection session: handshake, naming, relay and teardown

use crate::relay::broker::{BrokerCommand, BrokerHandle};
use crate::relay::error::SessionError;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the receive buffer. Every read delivers at most this many
/// bytes; longer payloads arrive as several independent reads.
pub const MAX_PAYLOAD: usize = 1024;

/// Largest single write the relay sends: a full-length name, `": "` and a
/// full-length payload.
pub const MAX_RELAYED: usize = 2 * MAX_PAYLOAD + 2;

/// Stable identifier of a session, assigned in connection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TLS negotiation in progress
    Handshaking,
    /// Encrypted channel is up, the first payload will become the name
    AwaitingName,
    /// Named; every payload is relayed to the other peers
    Active,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Handshaking => "handshaking",
            SessionState::AwaitingName => "awaiting-name",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Outcome of feeding one received payload to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The payload was captured as the display name; it is not relayed
    Name(Vec<u8>),
    /// The payload, already prefixed with the sender's name, to relay
    Message(Arc<[u8]>),
}

/// Build the relayed form of a payload: `<name>: <payload>`
pub fn format_message(name: &[u8], payload: &[u8]) -> Arc<[u8]> {
    let mut out = Vec::with_capacity(name.len() + 2 + payload.len());
    out.extend_from_slice(name);
    out.extend_from_slice(b": ");
    out.extend_from_slice(payload);
    out.into()
}

/// Server-side state of one client connection.
///
/// The session task is the only place that reads from the transport, so a
/// session never has more than one read outstanding. Writes to the client
/// are queued by the broker and performed by a separate writer task; a
/// completed write never starts a read.
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    state: SessionState,
    name: Option<Vec<u8>>,
    buffer: [u8; MAX_PAYLOAD],
    broker: BrokerHandle,
}

impl Session {
    /// Create a session for a freshly accepted connection
    pub fn new(id: SessionId, peer_addr: SocketAddr, broker: BrokerHandle) -> Self {
        Self {
            id,
            peer_addr,
            state: SessionState::Handshaking,
            name: None,
            buffer: [0; MAX_PAYLOAD],
            broker,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Display name, once the first payload has arrived
    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// Apply one received payload.
    ///
    /// The first payload after the handshake becomes the name verbatim and
    /// is never relayed. Every later payload is formatted for broadcast.
    /// Payloads are ignored outside `AwaitingName` and `Active`.
    pub fn receive(&mut self, payload: &[u8]) -> Option<Received> {
        Self::apply(&mut self.state, &mut self.name, payload)
    }

    /// Field-level form of [`Session::receive`], so the read loop can pass
    /// a slice of its own buffer without copying it.
    fn apply(
        state: &mut SessionState,
        name: &mut Option<Vec<u8>>,
        payload: &[u8],
    ) -> Option<Received> {
        match *state {
            SessionState::AwaitingName => {
                let captured = payload.to_vec();
                *name = Some(captured.clone());
                *state = SessionState::Active;
                Some(Received::Name(captured))
            }
            SessionState::Active => {
                let name = name.as_deref().unwrap_or_default();
                Some(Received::Message(format_message(name, payload)))
            }
            SessionState::Handshaking | SessionState::Closed => None,
        }
    }

    /// Drive the session to completion.
    ///
    /// Registers with the broker, awaits `handshake`, then reads until the
    /// peer goes away or the broker drops the session. The session reports
    /// its terminal error to the broker exactly once.
    pub async fn run<S, F>(mut self, handshake: F)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = io::Result<S>>,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        self.notify(BrokerCommand::Register {
            id: self.id,
            peer_addr: self.peer_addr,
            outbound: outbound_tx,
            closed: closed.clone(),
        });

        let stream = match handshake.await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session = %self.id, peer = %self.peer_addr, "TLS handshake failed: {}", e);
                self.close(SessionError::Handshake(e));
                return;
            }
        };

        tracing::debug!(session = %self.id, peer = %self.peer_addr, "TLS handshake completed");
        self.state = SessionState::AwaitingName;
        self.notify(BrokerCommand::HandshakeComplete { id: self.id });

        let (reader, writer) = tokio::io::split(stream);
        let write_task = tokio::spawn(write_loop(self.id, writer, outbound_rx, self.broker.clone()));

        match self.read_loop(reader, &closed).await {
            Some(cause) => self.close(cause),
            // Dropped by the broker, which already removed us
            None => self.state = SessionState::Closed,
        }

        // The writer stops once the broker releases our outbound queue
        let _ = write_task.await;
        tracing::debug!(session = %self.id, "Session finished");
    }

    /// Read until a terminal error. Returns `None` when the broker
    /// cancelled the session instead.
    async fn read_loop<R>(&mut self, mut reader: R, closed: &CancellationToken) -> Option<SessionError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let n = tokio::select! {
                _ = closed.cancelled() => return None,
                result = reader.read(&mut self.buffer) => match result {
                    Ok(0) => return Some(SessionError::PeerClosed),
                    Ok(n) => n,
                    Err(e) => return Some(SessionError::Read(e)),
                },
            };

            match Self::apply(&mut self.state, &mut self.name, &self.buffer[..n]) {
                Some(Received::Name(name)) => {
                    tracing::info!(
                        session = %self.id,
                        "Client name received: {}",
                        String::from_utf8_lossy(&name)
                    );
                    self.notify(BrokerCommand::Named { id: self.id, name });
                }
                Some(Received::Message(message)) => {
                    tracing::debug!(
                        session = %self.id,
                        bytes = n,
                        "{}",
                        String::from_utf8_lossy(&message)
                    );
                    self.notify(BrokerCommand::Broadcast {
                        from: self.id,
                        payload: message,
                    });
                }
                None => {}
            }
        }
    }

    fn close(&mut self, cause: SessionError) {
        self.state = SessionState::Closed;
        self.notify(BrokerCommand::Disconnected { id: self.id, cause });
    }

    fn notify(&self, cmd: BrokerCommand) {
        if let Err(e) = self.broker.send_command(cmd) {
            tracing::debug!(session = %self.id, "{:#}", e);
        }
    }
}

/// Drain the outbound queue into the transport, in order.
async fn write_loop<W>(
    id: SessionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Arc<[u8]>>,
    broker: BrokerHandle,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = outbound.recv().await {
        let result = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            let _ = broker.send_command(BrokerCommand::Disconnected {
                id,
                cause: SessionError::Write(e),
            });
            return;
        }
    }

    let _ = writer.shutdown().await;
}
