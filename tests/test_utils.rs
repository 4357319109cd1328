//! Test utilities and fixtures for tlsrelay
//!
//! Self-signed certificates, a server on an ephemeral port, and helpers for
//! waiting on the registry and on client input.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;
use tlsrelay::relay::{tls, BrokerHandle, ChatClient, RelayServer, SessionInfo, SessionState};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const HOST: &str = "127.0.0.1";

/// A self-signed certificate valid for the loopback address
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCert {
    pub fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec![
            HOST.to_string(),
            "localhost".to_string(),
        ])
        .expect("Failed to generate certificate");

        Self {
            cert_pem: cert.cert.pem(),
            key_pem: cert.key_pair.serialize_pem(),
        }
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        let certs = tls::parse_certs(self.cert_pem.as_bytes()).unwrap();
        let key = tls::parse_private_key(self.key_pem.as_bytes())
            .unwrap()
            .expect("no key in PEM");
        tls::acceptor(certs, key).unwrap()
    }

    pub fn connector(&self) -> TlsConnector {
        tls::connector(tls::parse_certs(self.cert_pem.as_bytes()).unwrap()).unwrap()
    }

    /// Write the certificate and key into `dir`
    pub fn write_to(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let cert_path = dir.join("certificate.crt");
        let key_path = dir.join("private.key");
        std::fs::write(&cert_path, &self.cert_pem).unwrap();
        std::fs::write(&key_path, &self.key_pem).unwrap();
        (cert_path, key_path)
    }
}

/// A relay server on an ephemeral loopback port
pub struct TestServer {
    pub server: RelayServer,
    pub connector: TlsConnector,
}

impl TestServer {
    pub async fn start() -> Self {
        let cert = TestCert::generate();
        let server = RelayServer::with_acceptor(format!("{}:0", HOST).parse().unwrap(), cert.acceptor())
            .await
            .unwrap();

        Self {
            server,
            connector: cert.connector(),
        }
    }

    pub fn handle(&self) -> BrokerHandle {
        self.server.handle()
    }

    pub fn port(&self) -> u16 {
        self.server.local_addr().port()
    }

    /// Connect a client and wait until the server has taken its name
    pub async fn join(&self, name: &str) -> ChatClient {
        let client = ChatClient::connect(HOST, self.port(), name, &self.connector)
            .await
            .unwrap();
        wait_for_sessions(&self.handle(), |s| {
            s.iter()
                .any(|i| i.state == SessionState::Active && i.name.as_deref() == Some(name))
        })
        .await;
        client
    }
}

/// Poll the registry until `pred` holds
pub async fn wait_for_sessions<F>(handle: &BrokerHandle, mut pred: F) -> Vec<SessionInfo>
where
    F: FnMut(&[SessionInfo]) -> bool,
{
    for _ in 0..300 {
        let sessions = handle.sessions().await.unwrap();
        if pred(&sessions) {
            return sessions;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached the expected state");
}

/// Read until exactly `len` bytes have arrived
pub async fn recv_len(client: &mut ChatClient, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .expect("timed out waiting for data")
            .unwrap()
            .expect("server closed the connection");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received.len(), len, "received more than expected");
    received
}

/// Assert nothing arrives for a short while
pub async fn assert_silent(client: &mut ChatClient) {
    let result = tokio::time::timeout(Duration::from_millis(300), client.recv()).await;
    if let Ok(data) = result {
        panic!("unexpected data: {:?}", data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_generation() {
        let cert = TestCert::generate();
        assert!(cert.cert_pem.contains("-----BEGIN CERTIFICATE-----"));
        assert!(cert.key_pem.contains("PRIVATE KEY"));
    }
}
