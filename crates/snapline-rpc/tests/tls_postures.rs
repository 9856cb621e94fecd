#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
use tokio::net::TcpListener;

use snapline_core::security::{SecurityDescriptor, TlsSide};
use snapline_rpc::{frame, tls};

struct Pki {
    _dir: tempfile::TempDir,
    ca: PathBuf,
    server_cert: PathBuf,
    server_key: PathBuf,
    client_cert: PathBuf,
    client_key: PathBuf,
}

fn write(dir: &Path, name: &str, body: String) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p
}

fn pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "snapline test ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let server_key = KeyPair::generate().unwrap();
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();

    let client_params = CertificateParams::new(vec!["control".to_string()]).unwrap();
    let client_key = KeyPair::generate().unwrap();
    let client_cert = client_params
        .signed_by(&client_key, &ca_cert, &ca_key)
        .unwrap();

    let d = dir.path().to_path_buf();
    let ca_dir = d.join("ca");
    std::fs::create_dir(&ca_dir).unwrap();
    Pki {
        ca: write(&ca_dir, "ca.pem", ca_cert.pem()),
        server_cert: write(&d, "server.crt", server_cert.pem()),
        server_key: write(&d, "server.key", server_key.serialize_pem()),
        client_cert: write(&d, "client.crt", client_cert.pem()),
        client_key: write(&d, "client.key", client_key.serialize_pem()),
        _dir: dir,
    }
}

async fn echo_once(server: SecurityDescriptor, client: SecurityDescriptor) -> snapline_core::Result<Vec<u8>> {
    let acceptor = tls::server_acceptor(&server)?;
    let connector = tls::client_connector(&client)?;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let Ok(io) = tls::accept(tcp, acceptor.as_ref()).await else {
            return;
        };
        let mut stream = frame::framed(io);
        if let Ok(Some(msg)) = frame::recv(&mut stream).await {
            let _ = frame::send(&mut stream, msg).await;
        }
    });

    let io = tls::connect(&addr, connector.as_ref()).await?;
    let mut stream = frame::framed(io);
    frame::send(&mut stream, b"hello".to_vec()).await?;
    frame::recv(&mut stream)
        .await?
        .ok_or_else(|| snapline_core::SnapError::Transport("closed".into()))
}

fn server_desc(p: &Pki, mutual: bool) -> SecurityDescriptor {
    SecurityDescriptor {
        tls_enabled: true,
        side: TlsSide::Server,
        cert_path: Some(p.server_cert.clone()),
        key_path: Some(p.server_key.clone()),
        ca_cert_paths: if mutual { vec![p.ca.clone()] } else { vec![] },
    }
}

fn client_desc(p: &Pki, with_identity: bool) -> SecurityDescriptor {
    SecurityDescriptor {
        tls_enabled: true,
        side: TlsSide::Client,
        cert_path: with_identity.then(|| p.client_cert.clone()),
        key_path: with_identity.then(|| p.client_key.clone()),
        ca_cert_paths: vec![p.ca.parent().unwrap().to_path_buf()],
    }
}

#[tokio::test]
async fn plain_tcp_when_off() {
    let got = echo_once(SecurityDescriptor::off(), SecurityDescriptor::off())
        .await
        .unwrap();
    assert_eq!(got, b"hello");
}

#[tokio::test]
async fn server_authenticated_tls() {
    let p = pki();
    let got = echo_once(server_desc(&p, false), client_desc(&p, false))
        .await
        .unwrap();
    assert_eq!(got, b"hello");
}

#[tokio::test]
async fn mutual_tls() {
    let p = pki();
    let got = echo_once(server_desc(&p, true), client_desc(&p, true))
        .await
        .unwrap();
    assert_eq!(got, b"hello");
}

#[tokio::test]
async fn mutual_tls_rejects_anonymous_client() {
    let p = pki();
    let res = echo_once(server_desc(&p, true), client_desc(&p, false)).await;
    assert!(res.is_err());
}
