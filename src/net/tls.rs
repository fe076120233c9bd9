//! TLS security transform and certificate loading.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::SecurityError;
use crate::net::security::{BoxedStream, SecurityTransform};

/// Build a rustls server configuration from PEM-encoded chain and key.
pub fn server_config_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ServerConfig>, SecurityError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<_, _>>()
        .map_err(|e| SecurityError::Material(format!("unreadable certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(SecurityError::Material(
            "no certificates found in PEM input".to_string(),
        ));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| SecurityError::Material(format!("unreadable private key PEM: {e}")))?
        .ok_or_else(|| SecurityError::Material("no private key found in PEM input".to_string()))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SecurityError::Material(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SecurityError::Material(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Load TLS configuration from certificate and key files.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, SecurityError> {
    // Basic validation
    if !cert_path.exists() {
        return Err(SecurityError::Material(format!(
            "Certificate file not found: {:?}",
            cert_path
        )));
    }
    if !key_path.exists() {
        return Err(SecurityError::Material(format!(
            "Private key file not found: {:?}",
            key_path
        )));
    }

    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| SecurityError::Material(format!("{:?}: {e}", cert_path)))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| SecurityError::Material(format!("{:?}: {e}", key_path)))?;

    server_config_from_pem(&cert_pem, &key_pem)
}

/// TLS transform backed by `tokio-rustls`.
#[derive(Clone)]
pub struct TlsTransform {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsTransform {
    pub fn new(config: Arc<ServerConfig>, handshake_timeout: Duration) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
            handshake_timeout,
        }
    }

    /// Build from the listener's TLS section.
    pub fn from_config(config: &TlsConfig, handshake_timeout: Duration) -> Result<Self, SecurityError> {
        let server_config = load_tls_config(
            Path::new(&config.cert_path),
            Path::new(&config.key_path),
        )?;
        Ok(Self::new(server_config, handshake_timeout))
    }
}

#[async_trait]
impl SecurityTransform for TlsTransform {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn handshake(&self, stream: BoxedStream) -> Result<BoxedStream, SecurityError> {
        match tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream)).await {
            Ok(Ok(tls)) => {
                let (_, session) = tls.get_ref();
                tracing::debug!(
                    server_name = session.server_name().unwrap_or("-"),
                    "TLS handshake complete"
                );
                Ok(Box::new(tls))
            }
            Ok(Err(e)) => Err(SecurityError::Handshake(e)),
            Err(_) => Err(SecurityError::HandshakeTimeout(self.handshake_timeout)),
        }
    }
}
