//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use http_ingress::config::ServerConfig;
use http_ingress::http::Body;
use http_ingress::net::{ConnectionTracker, ListenerError, SecurityTransform};
use http_ingress::{DecodedRequest, Handler, HandlerError, HttpServer, ResponseSpec, Shutdown};

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub tracker: ConnectionTracker,
    pub handle: JoinHandle<Result<(), ListenerError>>,
}

impl TestServer {
    /// Trigger shutdown and wait for the accept loop to drain.
    pub async fn stop(self) -> Result<(), ListenerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Loopback config with short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.backlog = 128;
    config.listener.max_connections = 256;
    config.timeouts.idle_secs = 5;
    config.timeouts.handshake_secs = 2;
    config.timeouts.shutdown_grace_secs = 5;
    config
}

pub async fn start_server(config: ServerConfig, handler: impl Handler) -> TestServer {
    let server = HttpServer::new(config, handler).expect("server construction failed");
    launch(server)
}

pub async fn start_server_with_security(
    config: ServerConfig,
    handler: impl Handler,
    security: Arc<dyn SecurityTransform>,
) -> TestServer {
    launch(HttpServer::with_security(config, handler, security))
}

fn launch(server: HttpServer) -> TestServer {
    let listener = server.bind().expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let tracker = server.tracker();
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(server.run(listener, rx));

    TestServer {
        addr,
        shutdown,
        tracker,
        handle,
    }
}

/// Handler answering with the target, or the body when there is one.
pub async fn echo(request: DecodedRequest) -> Result<ResponseSpec, HandlerError> {
    let body = match request.body() {
        Ok(Body::Empty) => request.message().target().to_string(),
        Ok(Body::Text(text)) => text.clone(),
        Ok(Body::Bytes(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Ok(Body::Json(value)) => value.to_string(),
        Ok(Body::Form(pairs)) => format!("{pairs:?}"),
        Err(e) => format!("decode error: {e}"),
    };
    Ok(ResponseSpec::text(200, body))
}

/// Write `request`, half-close, and read until the server closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();
    read_to_close(&mut stream).await
}

/// Read until the server closes, failing the test after a few seconds.
pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out))
        .await
        .expect("server never closed the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// Read exactly one response with a `Content-Length` body.
pub async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed inside response head");
        buf.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&buf).into_owned();
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    head + &String::from_utf8_lossy(&body)
}

pub fn status_of(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}
