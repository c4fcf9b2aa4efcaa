//! Secure transport: TLS connect plus ALPN outcome.
//!
//! The connection core only needs an authenticated byte stream and the
//! negotiated protocol; [`SecureConnector`] is that seam. [`RustlsConnector`]
//! is the `tokio-rustls` implementation.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Outcome of ALPN on an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedProtocol {
    /// Protocol identifier the connection settled on, if any.
    pub protocol: Option<String>,
    /// True when both peers explicitly agreed on `protocol`.
    pub is_mutual: bool,
}

impl NegotiatedProtocol {
    /// Both sides agreed on `protocol`.
    pub fn mutual(protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            is_mutual: true,
        }
    }

    /// The server selected nothing.
    pub fn none() -> Self {
        Self {
            protocol: None,
            is_mutual: false,
        }
    }

    /// Accept only a mutual agreement on exactly `expected`.
    pub fn verify(&self, expected: &str) -> Result<()> {
        let negotiated = self.protocol.as_deref().unwrap_or_default();
        if negotiated != expected {
            return Err(Error::BadProtocol {
                expected: expected.to_string(),
                negotiated: negotiated.to_string(),
            });
        }
        if !self.is_mutual {
            return Err(Error::NotMutual);
        }
        Ok(())
    }
}

/// Opens encrypted, hostname-verified connections.
pub trait SecureConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connect to `host:port`, offering `protocols` through ALPN.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        protocols: &'a [String],
    ) -> BoxFuture<'a, Result<(Self::Stream, NegotiatedProtocol)>>;
}

/// `tokio-rustls` connector. Certificate and hostname verification are
/// done by rustls against the configured roots.
#[derive(Clone)]
pub struct RustlsConnector {
    config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for RustlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsConnector").finish_non_exhaustive()
    }
}

impl RustlsConnector {
    /// Connector over a caller-built rustls configuration. Its ALPN list is
    /// replaced per connection.
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self { config }
    }

    /// Connector trusting the Mozilla root set.
    pub fn with_webpki_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::new(Arc::new(config))
    }

    fn config_for(&self, protocols: &[String]) -> Arc<rustls::ClientConfig> {
        let mut config = (*self.config).clone();
        config.alpn_protocols = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        Arc::new(config)
    }
}

impl SecureConnector for RustlsConnector {
    type Stream = TlsStream<TcpStream>;

    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        protocols: &'a [String],
    ) -> BoxFuture<'a, Result<(Self::Stream, NegotiatedProtocol)>> {
        Box::pin(async move {
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| Error::InvalidDnsName(host.to_string()))?;

            let tcp = TcpStream::connect((host, port)).await?;
            tcp.set_nodelay(true)?;
            tracing::debug!(host, port, "TCP connected, starting TLS");

            let connector = TlsConnector::from(self.config_for(protocols));
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::tls(e.to_string()))?;

            // rustls only reports a protocol both sides offered.
            let negotiated = match tls.get_ref().1.alpn_protocol() {
                Some(proto) => NegotiatedProtocol::mutual(String::from_utf8_lossy(proto)),
                None => NegotiatedProtocol::none(),
            };
            tracing::debug!(host, protocol = ?negotiated.protocol, "TLS established");
            Ok((tls, negotiated))
        })
    }
}
