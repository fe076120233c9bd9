//! TLS path: handshake, encrypted request/response, plaintext rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use http_ingress::net::tls::server_config_from_pem;
use http_ingress::net::{SecurityTransform, TlsTransform};
use http_ingress::{DecodedRequest, HandlerError, ResponseSpec};

mod common;

use common::{start_server_with_security, test_config};

struct Fixture {
    transform: Arc<dyn SecurityTransform>,
    client: Arc<ClientConfig>,
}

fn fixture() -> Fixture {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let server_config =
        server_config_from_pem(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes()).unwrap();
    let transform = Arc::new(TlsTransform::new(server_config, Duration::from_secs(2)));

    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let client = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Fixture {
        transform,
        client: Arc::new(client),
    }
}

#[tokio::test]
async fn request_over_tls() {
    let Fixture { transform, client } = fixture();
    let server = start_server_with_security(test_config(), common::echo, transform).await;

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let connector = TlsConnector::from(client);
    let mut tls = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();

    tls.write_all(b"GET /secure HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut out = Vec::new();
    // The server ends with close_notify, so this is a clean EOF.
    tls.read_to_end(&mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("/secure"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn plaintext_client_never_reaches_handler() {
    let Fixture { transform, .. } = fixture();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let server = start_server_with_security(
        test_config(),
        move |_req: DecodedRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(ResponseSpec::ok()) }
        },
        transform,
    )
    .await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server kept the connection open");
    assert!(!String::from_utf8_lossy(&out).contains("HTTP/1.1 200"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    server.stop().await.unwrap();
}
