//! tlsrelay - TLS-protected multi-client message relay
//!
//! Each client opens an encrypted connection, declares a display name, and
//! every payload it sends afterwards is rebroadcast to all other connected
//! clients as `"<name>: <payload>"`.

pub mod relay;

pub use relay::{BrokerHandle, ChatClient, RelayServer, ServerConfig, SessionId};
