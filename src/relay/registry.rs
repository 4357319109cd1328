// Registry of live sessions

use crate::relay::session::{SessionId, SessionState};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The registry's handle on one live session
#[derive(Debug)]
pub struct Peer {
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    pub name: Option<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Arc<[u8]>>,
    closed: CancellationToken,
}

impl Peer {
    pub fn new(
        peer_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Arc<[u8]>>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            peer_addr,
            state: SessionState::Handshaking,
            name: None,
            outbound,
            closed,
        }
    }

    /// Queue a payload for the session's writer
    pub fn send(&self, payload: Arc<[u8]>) -> bool {
        self.outbound.send(payload).is_ok()
    }

    /// Whether broadcasts should reach this session
    pub fn accepts_broadcast(&self) -> bool {
        matches!(self.state, SessionState::AwaitingName | SessionState::Active)
    }

    fn display_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(|n| String::from_utf8_lossy(n).into_owned())
    }
}

/// Point-in-time view of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub state: SessionState,
    pub name: Option<String>,
}

/// Result of one fan-out
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sessions the payload was queued for
    pub delivered: Vec<SessionId>,
    /// Sessions whose writer is gone; they were removed
    pub dropped: Vec<SessionId>,
}

/// All live sessions, in connection order.
///
/// Owned by the broker alone, so no locking is needed. Ids are handed out
/// in increasing order, which makes key order the connection order.
#[derive(Debug, Default)]
pub struct Registry {
    peers: BTreeMap<SessionId, Peer>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. An id that is already present is left alone.
    pub fn add(&mut self, id: SessionId, peer: Peer) -> bool {
        if self.peers.contains_key(&id) {
            tracing::warn!(session = %id, "Session registered twice, ignoring");
            return false;
        }
        self.peers.insert(id, peer);
        true
    }

    /// Remove a session and stop its read loop. Returns `None` if it was
    /// already gone.
    pub fn remove(&mut self, id: SessionId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        peer.closed.cancel();
        Some(peer)
    }

    pub fn get(&self, id: SessionId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Record that a session finished its handshake
    pub fn handshake_complete(&mut self, id: SessionId) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.state == SessionState::Handshaking => {
                peer.state = SessionState::AwaitingName;
                true
            }
            _ => false,
        }
    }

    /// Record a session's name. Only the first name sticks.
    pub fn set_name(&mut self, id: SessionId, name: Vec<u8>) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.name.is_none() => {
                peer.name = Some(name);
                peer.state = SessionState::Active;
                true
            }
            _ => false,
        }
    }

    /// Queue `payload` for every session except `from`.
    ///
    /// Sessions whose writer has already gone are removed after the pass,
    /// never while iterating.
    pub fn fan_out(&mut self, from: SessionId, payload: &Arc<[u8]>) -> FanOut {
        let mut result = FanOut::default();

        for (id, peer) in &self.peers {
            if *id == from || !peer.accepts_broadcast() {
                continue;
            }

            if peer.send(payload.clone()) {
                result.delivered.push(*id);
            } else {
                result.dropped.push(*id);
            }
        }

        for id in &result.dropped {
            self.remove(*id);
        }

        result
    }

    /// Stop every session and empty the registry
    pub fn close_all(&mut self) {
        for (_, peer) in std::mem::take(&mut self.peers) {
            peer.closed.cancel();
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.peers
            .iter()
            .map(|(id, peer)| SessionInfo {
                id: *id,
                peer_addr: peer.peer_addr,
                state: peer.state,
                name: peer.display_name(),
            })
            .collect()
    }

    /// One line per connected client, for the log
    pub fn describe(&self) -> String {
        self.peers
            .iter()
            .map(|(id, peer)| match peer.display_name() {
                Some(name) => format!("{} {} ({})", id, peer.peer_addr, name),
                None => format!("{} {}", id, peer.peer_addr),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
