// Relay server and client for TLS-protected chat
//
// The server side is an accept loop, one task per session with a single
// read loop, and a broker actor that owns the registry of live sessions
// and fans every message out to the other peers.

pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod registry;
pub mod server;
pub mod session;
pub mod tls;

pub use broker::{Broker, BrokerCommand, BrokerHandle};
pub use cli::{ClientCli, ServerCli};
pub use client::ChatClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{SessionError, TlsError};
pub use listener::Listener;
pub use registry::{FanOut, Peer, Registry, SessionInfo};
pub use server::RelayServer;
pub use session::{Session, SessionId, SessionState, MAX_PAYLOAD, MAX_RELAYED};
