//! h2-roundtrip: a minimal HTTP/2 client transport
//!
//! One TLS connection per request, negotiated to `h2` through ALPN, with a
//! single background reader that demultiplexes frames to streams and a
//! streamed response body.
//!
//! # Layers
//!
//! - [`h2_codec`]: frame parsing and building, header block reassembly
//! - [`hpack`]: header compression via fluke-hpack
//! - [`stream_table`]: stream identifier allocation and lookup
//! - [`connection`]: handshake, read loop, request submission
//! - [`transport`]: scheme dispatch, fallback, connect
//!
//! # Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use h2_roundtrip::{ClientConfig, Transport};
//!
//! # async fn run() -> h2_roundtrip::Result<()> {
//! let transport = Transport::new(ClientConfig::default());
//! let request = http::Request::get("https://example.com/")
//!     .body(None::<Bytes>)
//!     .map_err(|e| h2_roundtrip::Error::invalid_request(e.to_string()))?;
//!
//! let response = transport.round_trip(request).await?;
//! println!("{}", response.status());
//! let body = response.into_body().to_bytes().await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod h2_codec;
pub mod hpack;
pub mod response;
pub mod stream_table;
pub mod tls;
pub mod transport;
pub mod writer;

pub use config::ClientConfig;
pub use connection::{connect, request_header_fields, ClientConnection, PeerSettings};
pub use error::{Error, Result};
pub use h2_codec::{H2Codec, H2Event, H2FrameHeader};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder};
pub use response::Body;
pub use tls::{NegotiatedProtocol, RustlsConnector, SecureConnector};
pub use transport::{Fallback, Transport};
