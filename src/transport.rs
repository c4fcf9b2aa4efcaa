//! Request dispatch: one HTTP/2 connection per `https` round trip, with a
//! pluggable fallback for every other scheme.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};

use crate::config::ClientConfig;
use crate::connection::connect;
use crate::error::{Error, Result};
use crate::response::Body;
use crate::tls::{RustlsConnector, SecureConnector};

/// Handles requests whose scheme this transport does not serve.
pub trait Fallback: Send + Sync {
    fn round_trip(&self, request: Request<Option<Bytes>>) -> BoxFuture<'_, Result<Response<Body>>>;
}

/// HTTP/2 round tripper.
pub struct Transport<C = RustlsConnector> {
    config: ClientConfig,
    connector: C,
    fallback: Option<Arc<dyn Fallback>>,
}

impl<C> std::fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport<RustlsConnector> {
    /// Transport over rustls with the Mozilla root set.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, RustlsConnector::with_webpki_roots())
    }
}

impl<C: SecureConnector> Transport<C> {
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            fallback: None,
        }
    }

    /// Route non-`https` requests to `fallback`.
    pub fn fallback(mut self, fallback: Arc<dyn Fallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform one request.
    ///
    /// `https` requests open a fresh connection, complete the handshake and
    /// wait for the response headers; the body streams in afterwards.
    pub async fn round_trip(&self, request: Request<Option<Bytes>>) -> Result<Response<Body>> {
        let scheme = request.uri().scheme_str().unwrap_or_default().to_string();
        if scheme != "https" {
            return match &self.fallback {
                Some(fallback) => {
                    tracing::debug!(%scheme, uri = %request.uri(), "using fallback");
                    fallback.round_trip(request).await
                }
                None => Err(Error::UnsupportedScheme(scheme)),
            };
        }

        let host = request
            .uri()
            .host()
            .ok_or_else(|| Error::invalid_request(format!("request URI {} has no host", request.uri())))?;
        // IPv6 literals keep their brackets in the URI but not in a socket
        // address or TLS server name.
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();
        let port = request.uri().port_u16().unwrap_or(self.config.default_port);

        let connection = connect(&self.connector, &host, port, &self.config).await?;
        tracing::debug!(%host, port, method = %request.method(), "sending request");
        connection.send_request(request).await
    }
}
