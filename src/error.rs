//! Error types for h2-roundtrip.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing a connection or running a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error, including sticky write failures.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake or configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The target host is not a valid DNS name or IP address.
    #[error("invalid server name: {0}")]
    InvalidDnsName(String),

    /// ALPN settled on something other than the expected protocol.
    #[error("bad protocol: expected {expected:?}, negotiated {negotiated:?}")]
    BadProtocol { expected: String, negotiated: String },

    /// ALPN produced no mutually agreed protocol.
    #[error("could not negotiate protocol mutually")]
    NotMutual,

    /// A frame of the wrong type arrived where a specific one was required.
    #[error("expected {expected} frame, got {got}")]
    UnexpectedFrame {
        expected: &'static str,
        got: &'static str,
    },

    /// HTTP/2 framing or state violation by the peer.
    #[error("HTTP/2 protocol error: {0}")]
    Protocol(String),

    /// HPACK decoding failure. Fatal to the connection.
    #[error("HPACK error: {0}")]
    Compression(String),

    /// A frame referenced a stream this connection does not track.
    #[error("frame for unknown stream {0}")]
    UnknownStream(u32),

    /// Client-initiated stream identifiers ran out.
    #[error("stream identifiers exhausted")]
    StreamIdsExhausted,

    /// The peer reset the stream.
    #[error("stream {stream_id} reset by peer (error code {error_code:#x})")]
    StreamReset { stream_id: u32, error_code: u32 },

    /// The peer sent GOAWAY and will not process this stream.
    #[error("GOAWAY received (last stream {last_stream_id}, error code {error_code:#x})")]
    GoAway { last_stream_id: u32, error_code: u32 },

    /// The read loop ended before the stream completed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Scheme is not served by HTTP/2 and no fallback is configured.
    #[error("unsupported scheme {0:?} and no fallback")]
    UnsupportedScheme(String),

    /// The request could not be turned into an HTTP/2 header block.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Create an HTTP/2 protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// True for errors that end the whole connection rather than one stream.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Protocol(_)
                | Self::Compression(_)
                | Self::ConnectionLost(_)
                | Self::GoAway { .. }
        )
    }
}
