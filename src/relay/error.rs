// Error types for the relay

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to build the TLS configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("malformed PEM data: {0}")]
    Pem(#[source] io::Error),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("invalid server name: {0}")]
    ServerName(String),
}

/// Why a session left the registry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}
