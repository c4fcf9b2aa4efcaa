//! HPACK (RFC 7541) on top of `fluke-hpack`.
//!
//! Thin wrapper around `fluke-hpack` providing the H2Header type and the
//! encoder/decoder interfaces used by the connection. Both sides keep dynamic
//! table state per connection, so one encoder and one decoder exist per
//! connection and every block must pass through them in wire order.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Initial SETTINGS_HEADER_TABLE_SIZE (RFC 9113 Section 6.5.2).
pub const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;

/// One header field as plain strings.
#[derive(Debug, Clone, PartialEq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// True for `:method`, `:status` and the other pseudo-headers.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// Connection-scoped decoder; its dynamic table must see every block in order.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self::with_max_table_size(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Decoder that rejects dynamic table size updates above `max_table_size`.
    pub fn with_max_table_size(max_table_size: usize) -> Self {
        let mut inner = fluke_hpack::Decoder::new();
        inner.set_max_allowed_table_size(max_table_size);
        Self { inner }
    }

    /// Decode a complete header block, calling `on_field` once per field in
    /// block order.
    pub fn decode_with(&mut self, block: &[u8], mut on_field: impl FnMut(&[u8], &[u8])) -> Result<()> {
        self.inner
            .decode_with_cb(block, |name: Cow<[u8]>, value: Cow<[u8]>| {
                on_field(&name, &value)
            })
            .map_err(|e| Error::Compression(format!("{e:?}")))
    }

    /// Decode `block` into owned fields, lossily converting non-UTF-8 bytes.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<H2Header>> {
        let mut headers = Vec::new();
        self.decode_with(block, |name, value| {
            headers.push(H2Header::new(
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            ));
        })?;
        Ok(headers)
    }
}

/// Connection-scoped encoder. Blocks must reach the peer in encode order.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode `headers` as one complete block.
    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}
