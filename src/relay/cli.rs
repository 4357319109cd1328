// Command-line arguments for the relay binaries

use crate::relay::config::{ServerConfig, DEFAULT_CERT_PATH, DEFAULT_KEY_PATH};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// TLS chat relay server
#[derive(Debug, Parser)]
#[command(name = "relay-server")]
#[command(about = "Relay every message a client sends to all other connected clients over TLS")]
pub struct ServerCli {
    /// TCP port to listen on
    pub port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// PEM certificate chain presented to clients
    #[arg(long, default_value = DEFAULT_CERT_PATH)]
    pub cert: PathBuf,

    /// PEM private key for the certificate
    #[arg(long, default_value = DEFAULT_KEY_PATH)]
    pub key: PathBuf,
}

impl ServerCli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            cert_path: self.cert,
            key_path: self.key,
        }
    }
}

/// TLS chat relay client. Missing values are prompted for.
#[derive(Debug, Parser)]
#[command(name = "relay-client")]
#[command(about = "Chat with everyone connected to a relay server")]
pub struct ClientCli {
    /// Display name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Server address
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Certificate to trust for the server
    #[arg(long, default_value = DEFAULT_CERT_PATH)]
    pub ca: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_requires_port() {
        assert!(ServerCli::try_parse_from(["relay-server"]).is_err());
        assert!(ServerCli::try_parse_from(["relay-server", "not-a-port"]).is_err());

        let cli = ServerCli::try_parse_from(["relay-server", "12340"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config.port, 12340);
        assert_eq!(config.cert_path, PathBuf::from(DEFAULT_CERT_PATH));
    }

    #[test]
    fn test_server_overrides() {
        let cli = ServerCli::try_parse_from([
            "relay-server",
            "9000",
            "--bind",
            "127.0.0.1",
            "--cert",
            "/etc/relay/cert.pem",
            "--key",
            "/etc/relay/key.pem",
        ])
        .unwrap();

        let config = cli.into_config();
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.key_path, PathBuf::from("/etc/relay/key.pem"));
    }

    #[test]
    fn test_client_all_optional() {
        let cli = ClientCli::try_parse_from(["relay-client"]).unwrap();
        assert!(cli.name.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());

        let cli = ClientCli::try_parse_from([
            "relay-client",
            "--name",
            "Alice",
            "--host",
            "localhost",
            "-p",
            "12340",
        ])
        .unwrap();
        assert_eq!(cli.name.as_deref(), Some("Alice"));
        assert_eq!(cli.port, Some(12340));
    }
}
