//! TLS material for the relay
//!
//! Loads the PEM certificate chain and private key the server presents, and
//! builds the client-side connector that trusts a given certificate. Both
//! sides use the `ring` crypto provider explicitly.

use crate::relay::error::TlsError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse every certificate in a PEM document
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)
}

/// Parse the first private key in a PEM document
pub fn parse_private_key(pem: &[u8]) -> Result<Option<PrivateKeyDer<'static>>, TlsError> {
    rustls_pemfile::private_key(&mut &pem[..]).map_err(TlsError::Pem)
}

/// Load a PEM certificate chain from disk
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = parse_certs(&read_file(path)?)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load a PEM private key from disk
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    parse_private_key(&read_file(path)?)?.ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build the server acceptor from an already parsed chain and key
pub fn acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, TlsError> {
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the server acceptor from PEM files
pub fn acceptor_from_files(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    tracing::info!(
        fingerprint = %fingerprint(&certs[0]),
        "Loaded certificate from {:?}",
        cert_path
    );
    acceptor(certs, key)
}

/// Build a client connector that trusts exactly `trusted`
pub fn connector(trusted: Vec<CertificateDer<'static>>) -> Result<TlsConnector, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add(cert)?;
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Build a client connector trusting the certificates in a PEM file
pub fn connector_from_file(ca_path: &Path) -> Result<TlsConnector, TlsError> {
    connector(load_certs(ca_path)?)
}

/// Name the client expects on the server certificate
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| TlsError::ServerName(host.to_string()))
}

/// SHA-256 fingerprint of a DER certificate, as colon separated hex
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    hex::encode_upper(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}
