// Server and client configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Certificate chain the server presents and the client trusts
pub const DEFAULT_CERT_PATH: &str = "ssl_certification/certificate.crt";
/// Private key matching [`DEFAULT_CERT_PATH`]
pub const DEFAULT_KEY_PATH: &str = "ssl_certification/private.key";

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl ServerConfig {
    /// Listen on every IPv4 interface with the default TLS files
    pub fn new(port: u16) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub ca_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::new(12340);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:12340");
        assert!(config.cert_path.ends_with("certificate.crt"));
        assert!(config.key_path.ends_with("private.key"));
    }
}
