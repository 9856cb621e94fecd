//! TLS configuration from a [`SecurityDescriptor`].
//!
//! Postures:
//! - off: plain TCP
//! - server-authenticated: the plugin presents a certificate; the control side
//!   verifies it against the configured CAs
//! - mutual: both sides present certificates signed by the configured CAs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use snapline_core::error::{Result, SnapError};
use snapline_core::security::{SecurityDescriptor, TlsPosture, TlsSide};

use crate::frame::BoxIo;

fn tls_err(msg: impl Into<String>) -> SnapError {
    SnapError::Config(format!("tls: {}", msg.into()))
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| tls_err(format!("read {}: {e}", path.display())))
}

fn parse_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_err(format!("parse certificates in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(tls_err(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn parse_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read(path)?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|e| tls_err(format!("parse private key {}: {e}", path.display())))
}

/// Expand CA entries: files are used as-is, directories contribute every
/// `.pem`/`.crt` file inside (not recursive).
fn ca_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in paths {
        if p.is_dir() {
            let entries =
                fs::read_dir(p).map_err(|e| tls_err(format!("read dir {}: {e}", p.display())))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|f| {
                    matches!(
                        f.extension().and_then(|x| x.to_str()),
                        Some("pem") | Some("crt")
                    )
                })
                .collect();
            found.sort();
            out.extend(found);
        } else {
            out.push(p.clone());
        }
    }
    Ok(out)
}

fn root_store(paths: &[PathBuf]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for file in ca_files(paths)? {
        for cert in parse_certificates(&file)? {
            store
                .add(cert)
                .map_err(|e| tls_err(format!("add CA certificate: {e}")))?;
        }
    }
    if store.is_empty() {
        return Err(tls_err("no CA certificates found"));
    }
    Ok(store)
}

fn identity(
    desc: &SecurityDescriptor,
) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
    match (&desc.cert_path, &desc.key_path) {
        (Some(c), Some(k)) => Ok(Some((parse_certificates(c)?, parse_private_key(k)?))),
        (None, None) => Ok(None),
        _ => Err(tls_err("cert_path and key_path must be set together")),
    }
}

/// Server-side acceptor; `None` when the posture is off.
pub fn server_acceptor(desc: &SecurityDescriptor) -> Result<Option<TlsAcceptor>> {
    let posture = desc.posture();
    if posture == TlsPosture::Off {
        return Ok(None);
    }
    if desc.side != TlsSide::Server {
        return Err(tls_err("descriptor is not a server descriptor"));
    }
    let (certs, key) = identity(desc)?.ok_or_else(|| tls_err("server certificate required"))?;

    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err(format!("protocol versions: {e}")))?;
    let built = if posture == TlsPosture::Mutual {
        let verifier = WebPkiClientVerifier::builder_with_provider(
            Arc::new(root_store(&desc.ca_cert_paths)?),
            provider(),
        )
        .build()
        .map_err(|e| tls_err(format!("client verifier: {e}")))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)
    };
    let config = built.map_err(|e| tls_err(format!("server config: {e}")))?;

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

/// Client-side connector; `None` when the posture is off.
pub fn client_connector(desc: &SecurityDescriptor) -> Result<Option<TlsConnector>> {
    if desc.posture() == TlsPosture::Off {
        return Ok(None);
    }
    if desc.side != TlsSide::Client {
        return Err(tls_err("descriptor is not a client descriptor"));
    }
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err(format!("protocol versions: {e}")))?
        .with_root_certificates(root_store(&desc.ca_cert_paths)?);
    let config = match identity(desc)? {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| tls_err(format!("client config: {e}")))?,
        None => builder.with_no_client_auth(),
    };
    Ok(Some(TlsConnector::from(Arc::new(config))))
}

/// Dial `addr` (`host:port`), wrapping in TLS when a connector is given. The
/// host part is the name the server certificate is checked against.
pub async fn connect(addr: &str, connector: Option<&TlsConnector>) -> Result<BoxIo> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| SnapError::Transport(format!("connect {addr}: {e}")))?;
    let _ = tcp.set_nodelay(true);
    let Some(connector) = connector else {
        return Ok(Box::new(tcp));
    };
    let (host, _port) = split_host_port(addr)?;
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| SnapError::Transport(format!("invalid server name {host}: {e}")))?;
    let tls = connector
        .connect(name, tcp)
        .await
        .map_err(|e| SnapError::Transport(format!("tls handshake with {addr}: {e}")))?;
    Ok(Box::new(tls))
}

/// Server side of [`connect`].
pub async fn accept(tcp: TcpStream, acceptor: Option<&TlsAcceptor>) -> Result<BoxIo> {
    let _ = tcp.set_nodelay(true);
    match acceptor {
        Some(a) => {
            let tls = a
                .accept(tcp)
                .await
                .map_err(|e| SnapError::Transport(format!("tls accept: {e}")))?;
            Ok(Box::new(tls))
        }
        None => Ok(Box::new(tcp)),
    }
}

/// `host:port` or `[v6]:port`.
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| SnapError::Config(format!("address {addr} has no port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| SnapError::Config(format!("address {addr} has an invalid port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(SnapError::Config(format!("address {addr} has no host")));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn host_port_split() {
        assert_eq!(split_host_port("127.0.0.1:80").unwrap(), ("127.0.0.1", 80));
        assert_eq!(split_host_port("[::1]:9000").unwrap(), ("::1", 9000));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port("h:notaport").is_err());
    }

    #[test]
    fn off_posture_builds_nothing() {
        let desc = SecurityDescriptor::off();
        assert!(server_acceptor(&desc).unwrap().is_none());
        assert!(client_connector(&desc).unwrap().is_none());
    }
}
