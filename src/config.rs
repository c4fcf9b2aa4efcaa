//! Client configuration, passed explicitly into connection establishment.

use crate::h2_codec::{settings_id, DEFAULT_MAX_FRAME_SIZE, MAX_HEADER_BLOCK_SIZE};
use crate::hpack::DEFAULT_HEADER_TABLE_SIZE;

/// ALPN identifier for HTTP/2 over TLS.
pub const PROTOCOL_H2: &str = "h2";

/// Default port for `https` authorities without one.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Settings for one client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Protocol that ALPN must settle on.
    pub protocol: String,
    /// Port used when the authority carries none.
    pub default_port: u16,
    /// SETTINGS advertised to the peer, in order.
    pub settings: Vec<(u16, u32)>,
    /// Upper bound for the HPACK decoder's dynamic table.
    pub header_table_size: usize,
    /// Upper bound for a header block reassembled from CONTINUATION frames.
    pub max_header_block_size: usize,
    /// Buffered chunks per response body before the reader waits on the consumer.
    pub body_channel_capacity: usize,
    /// Socket read size for the background reader.
    pub read_buffer_size: usize,
    /// Hand received DATA bytes straight back to the peer as WINDOW_UPDATEs.
    pub replenish_window: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_H2.to_string(),
            default_port: DEFAULT_HTTPS_PORT,
            settings: vec![(settings_id::ENABLE_PUSH, 0)],
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            body_channel_capacity: 16,
            read_buffer_size: 16 * 1024,
            replenish_window: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol ALPN must negotiate.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the port used for authorities without one.
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Replace the advertised SETTINGS.
    pub fn settings(mut self, settings: Vec<(u16, u32)>) -> Self {
        self.settings = settings;
        self
    }

    /// Set the HPACK decoder's dynamic table bound.
    pub fn header_table_size(mut self, size: usize) -> Self {
        self.header_table_size = size;
        self
    }

    /// Set the reassembled header block bound.
    pub fn max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    /// Set the per-body chunk buffer.
    pub fn body_channel_capacity(mut self, capacity: usize) -> Self {
        self.body_channel_capacity = capacity.max(1);
        self
    }

    /// Set the background reader's socket read size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Enable or disable WINDOW_UPDATE replenishment.
    pub fn replenish_window(mut self, enable: bool) -> Self {
        self.replenish_window = enable;
        self
    }

    /// Largest inbound frame payload we accept: our advertised
    /// SETTINGS_MAX_FRAME_SIZE, or the protocol default.
    pub fn local_max_frame_size(&self) -> u32 {
        self.settings
            .iter()
            .rev()
            .find(|(id, _)| *id == settings_id::MAX_FRAME_SIZE)
            .map(|(_, value)| *value)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }
}
