//! HTTP/2 frame codec for the client connection.
//!
//! Inbound, the codec buffers raw bytes from the socket and turns them into
//! [`H2Event`]s. It strips padding and priority fields, and reassembles a
//! header block split across HEADERS + CONTINUATION frames, so the caller only
//! ever sees complete header blocks. Outbound, it provides builders for every
//! frame the client writes.
//!
//! The codec knows nothing about HPACK or streams beyond the single header
//! block that may be in flight: a CONTINUATION frame for any other stream is a
//! protocol error, which keeps the connection-wide HPACK decoder from ever
//! seeing two interleaved blocks.
//!
//! Reference: RFC 9113 (HTTP/2)

use crate::error::{Error, Result};

/// HTTP/2 frame types (RFC 9113 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;

    /// Human-readable name, for errors and logs.
    pub fn name(frame_type: u8) -> &'static str {
        match frame_type {
            DATA => "DATA",
            HEADERS => "HEADERS",
            PRIORITY => "PRIORITY",
            RST_STREAM => "RST_STREAM",
            SETTINGS => "SETTINGS",
            PUSH_PROMISE => "PUSH_PROMISE",
            PING => "PING",
            GOAWAY => "GOAWAY",
            WINDOW_UPDATE => "WINDOW_UPDATE",
            CONTINUATION => "CONTINUATION",
            _ => "UNKNOWN",
        }
    }
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 9113 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 9113 Section 7)
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE, and its lower bound.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Upper bound for SETTINGS_MAX_FRAME_SIZE (2^24 - 1).
pub const MAX_ALLOWED_FRAME_SIZE: u32 = 16_777_215;

/// Default bound on an accumulated header block (256 KB).
/// Bounds memory spent on a CONTINUATION flood.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The HTTP/2 client connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The fixed 9-byte header in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// `None` until at least 9 bytes are available.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Serialize into the 9-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        let sid = (self.stream_id & 0x7FFF_FFFF).to_be_bytes();
        [
            len[1],
            len[2],
            len[3],
            self.frame_type,
            self.flags,
            sid[0],
            sid[1],
            sid[2],
            sid[3],
        ]
    }

    /// Header plus payload.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn type_name(&self) -> &'static str {
        frame_type::name(self.frame_type)
    }
}

/// Events emitted by the codec when parsing frames
#[derive(Debug)]
pub enum H2Event {
    /// A complete header block (HEADERS plus any CONTINUATION frames)
    Headers {
        stream_id: u32,
        header_block: Vec<u8>, // HPACK-encoded headers
        end_stream: bool,
    },
    /// Data for a stream
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        /// Full payload length including padding; what the peer charged
        /// against its send window.
        flow_controlled_len: u32,
    },
    /// RST_STREAM
    StreamReset { stream_id: u32, error_code: u32 },
    /// GOAWAY
    GoAway { last_stream_id: u32, error_code: u32 },
    /// SETTINGS or its ACK
    Settings {
        ack: bool,
        /// `(identifier, value)` pairs in wire order; empty on an ACK.
        settings: Vec<(u16, u32)>,
    },
    /// Window update
    WindowUpdate { stream_id: u32, increment: u32 },
    /// PING
    Ping { ack: bool, data: [u8; 8] },
    /// PRIORITY or an unknown type: parsed and dropped.
    Ignored { stream_id: u32, frame_type: u8 },
}

/// Incremental HTTP/2 frame parser.
#[derive(Debug)]
pub struct H2Codec {
    /// Bytes not yet consumed as whole frames
    buffer: Vec<u8>,
    /// Largest frame payload we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: u32,
    /// Bound on a reassembled header block
    max_header_block_size: usize,
    /// Stream whose header block still lacks END_HEADERS
    pending_headers_stream: Option<u32>,
    /// END_STREAM as carried by that block's HEADERS frame
    pending_headers_end_stream: bool,
    /// Fragments received so far
    pending_header_block: Vec<u8>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            pending_headers_stream: None,
            pending_headers_end_stream: false,
            pending_header_block: Vec::new(),
        }
    }
}

impl H2Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec accepting payloads up to `max_frame_size` and header blocks up to
    /// `max_header_block_size` bytes.
    pub fn with_limits(max_frame_size: u32, max_header_block_size: usize) -> Self {
        Self {
            max_frame_size,
            max_header_block_size,
            ..Self::default()
        }
    }

    /// Append raw bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Header of the next buffered frame, if at least 9 bytes are buffered.
    pub fn peek_frame_header(&self) -> Option<H2FrameHeader> {
        H2FrameHeader::parse(&self.buffer)
    }

    /// True while a header block is waiting for its END_HEADERS.
    pub fn header_block_pending(&self) -> bool {
        self.pending_headers_stream.is_some()
    }

    /// Number of buffered bytes not yet consumed as frames.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Parse buffered frames until one yields an event or the buffer runs out
    /// of complete frames.
    pub fn next_event(&mut self) -> Result<Option<H2Event>> {
        loop {
            let header = match H2FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => return Ok(None),
            };

            if header.length > self.max_frame_size {
                return Err(Error::protocol(format!(
                    "{} frame of {} bytes exceeds max frame size {}",
                    header.type_name(),
                    header.length,
                    self.max_frame_size
                )));
            }

            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                return Ok(None);
            }

            // split_off leaves [0..total_size] in self.buffer; swap so the
            // remainder stays buffered and we own the frame bytes.
            let remainder = self.buffer.split_off(total_size);
            let mut payload = std::mem::replace(&mut self.buffer, remainder);
            payload.drain(..FRAME_HEADER_SIZE);

            if let Some(event) = self.parse_frame(&header, payload)? {
                return Ok(Some(event));
            }
        }
    }

    /// Process incoming data and return every event it completes.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<H2Event>> {
        self.feed(data);
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    fn parse_frame(&mut self, header: &H2FrameHeader, payload: Vec<u8>) -> Result<Option<H2Event>> {
        if let Some(pending) = self.pending_headers_stream {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(Error::protocol(format!(
                    "{} frame while header block on stream {} awaits CONTINUATION",
                    header.type_name(),
                    pending
                )));
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                if header.stream_id == 0 {
                    return Err(Error::protocol("DATA frame on stream 0"));
                }
                let flow_controlled_len = header.length;
                let data = extract_data_payload(header, payload)?;
                Ok(Some(H2Event::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.is_end_stream(),
                    flow_controlled_len,
                }))
            }
            frame_type::HEADERS => {
                if header.stream_id == 0 {
                    return Err(Error::protocol("HEADERS frame on stream 0"));
                }
                let header_block = extract_headers_payload(header, payload)?;
                if header.is_end_headers() {
                    return Ok(Some(H2Event::Headers {
                        stream_id: header.stream_id,
                        header_block,
                        end_stream: header.is_end_stream(),
                    }));
                }
                // Wait for the rest of the block.
                if header_block.len() > self.max_header_block_size {
                    return Err(Error::protocol(format!(
                        "Header block too large ({} bytes, max {})",
                        header_block.len(),
                        self.max_header_block_size
                    )));
                }
                self.pending_headers_stream = Some(header.stream_id);
                self.pending_headers_end_stream = header.is_end_stream();
                self.pending_header_block = header_block;
                Ok(None)
            }
            frame_type::CONTINUATION => {
                let pending_stream = match self.pending_headers_stream {
                    Some(id) => id,
                    None => {
                        return Err(Error::protocol(format!(
                            "Unexpected CONTINUATION frame for stream {}",
                            header.stream_id
                        )))
                    }
                };
                if pending_stream != header.stream_id {
                    return Err(Error::protocol(format!(
                        "CONTINUATION for stream {} but pending headers on stream {}",
                        header.stream_id, pending_stream
                    )));
                }
                let new_size = self.pending_header_block.len() + payload.len();
                if new_size > self.max_header_block_size {
                    self.clear_pending();
                    return Err(Error::protocol(format!(
                        "Header block too large ({} bytes, max {})",
                        new_size, self.max_header_block_size
                    )));
                }
                self.pending_header_block.extend_from_slice(&payload);
                if !header.is_end_headers() {
                    return Ok(None);
                }
                let header_block = std::mem::take(&mut self.pending_header_block);
                let end_stream = self.pending_headers_end_stream;
                self.clear_pending();
                Ok(Some(H2Event::Headers {
                    stream_id: header.stream_id,
                    header_block,
                    end_stream,
                }))
            }
            frame_type::RST_STREAM => {
                if payload.len() != 4 {
                    return Err(Error::protocol("RST_STREAM frame must be 4 bytes"));
                }
                Ok(Some(H2Event::StreamReset {
                    stream_id: header.stream_id,
                    error_code: read_u32(&payload[0..4]),
                }))
            }
            frame_type::SETTINGS => {
                if header.stream_id != 0 {
                    return Err(Error::protocol("SETTINGS frame on a stream"));
                }
                let ack = header.flags & flags::ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(Error::protocol("SETTINGS ACK with a payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::protocol(format!(
                        "SETTINGS payload of {} bytes is not a multiple of 6",
                        payload.len()
                    )));
                }
                // Each setting is 6 bytes: u16 id + u32 value
                let settings = payload
                    .chunks_exact(6)
                    .map(|entry| (u16::from_be_bytes([entry[0], entry[1]]), read_u32(&entry[2..6])))
                    .collect();
                Ok(Some(H2Event::Settings { ack, settings }))
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(Error::protocol("GOAWAY frame too short"));
                }
                Ok(Some(H2Event::GoAway {
                    last_stream_id: read_u32(&payload[0..4]) & 0x7FFF_FFFF,
                    error_code: read_u32(&payload[4..8]),
                }))
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() != 4 {
                    return Err(Error::protocol("WINDOW_UPDATE frame must be 4 bytes"));
                }
                Ok(Some(H2Event::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: read_u32(&payload[0..4]) & 0x7FFF_FFFF,
                }))
            }
            frame_type::PING => {
                if payload.len() != 8 {
                    return Err(Error::protocol("PING frame must be 8 bytes"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Some(H2Event::Ping {
                    ack: header.flags & flags::ACK != 0,
                    data,
                }))
            }
            // A promised header block would have to go through the HPACK
            // decoder; push is never accepted, so the connection cannot recover.
            frame_type::PUSH_PROMISE => Err(Error::protocol(format!(
                "PUSH_PROMISE on stream {} but server push is disabled",
                header.stream_id
            ))),
            // PRIORITY is advisory; unknown types must be ignored.
            _ => Ok(Some(H2Event::Ignored {
                stream_id: header.stream_id,
                frame_type: header.frame_type,
            })),
        }
    }

    fn clear_pending(&mut self) {
        self.pending_headers_stream = None;
        self.pending_headers_end_stream = false;
        self.pending_header_block.clear();
    }

    /// Create a SETTINGS frame carrying the given (identifier, value) pairs.
    /// An empty list announces the protocol defaults.
    pub fn create_settings(settings: &[(u16, u32)]) -> Vec<u8> {
        let mut frame = frame_with_header(frame_type::SETTINGS, 0, 0, settings.len() * 6);
        for (id, value) in settings {
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame
    }

    /// Empty SETTINGS with the ACK flag.
    pub fn create_settings_ack() -> Vec<u8> {
        frame_with_header(frame_type::SETTINGS, flags::ACK, 0, 0)
    }

    /// Create a HEADERS frame carrying the first (or only) header block fragment.
    pub fn create_headers_frame(
        stream_id: u32,
        fragment: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> Vec<u8> {
        let mut flags_byte = 0;
        if end_stream {
            flags_byte |= flags::END_STREAM;
        }
        if end_headers {
            flags_byte |= flags::END_HEADERS;
        }
        let mut frame = frame_with_header(frame_type::HEADERS, flags_byte, stream_id, fragment.len());
        frame.extend_from_slice(fragment);
        frame
    }

    /// One more fragment of a header block; `end_headers` marks the last.
    pub fn create_continuation_frame(stream_id: u32, payload: &[u8], end_headers: bool) -> Vec<u8> {
        let flags_byte = if end_headers { flags::END_HEADERS } else { 0 };
        let mut frame = frame_with_header(frame_type::CONTINUATION, flags_byte, stream_id, payload.len());
        frame.extend_from_slice(payload);
        frame
    }

    /// Split an encoded header block into HEADERS + CONTINUATION frames no
    /// larger than `max_frame_size`. END_HEADERS goes on the last frame only;
    /// END_STREAM, when requested, on the HEADERS frame.
    pub fn create_header_block_frames(
        stream_id: u32,
        header_block: &[u8],
        max_frame_size: u32,
        end_stream: bool,
    ) -> Vec<Vec<u8>> {
        let chunk_size = max_frame_size.max(1) as usize;
        if header_block.is_empty() {
            return vec![Self::create_headers_frame(stream_id, &[], end_stream, true)];
        }
        let chunk_count = header_block.len().div_ceil(chunk_size);
        header_block
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let end_headers = i + 1 == chunk_count;
                if i == 0 {
                    Self::create_headers_frame(stream_id, chunk, end_stream, end_headers)
                } else {
                    Self::create_continuation_frame(stream_id, chunk, end_headers)
                }
            })
            .collect()
    }

    /// Create a DATA frame
    pub fn create_data_frame(stream_id: u32, data: &[u8], end_stream: bool) -> Vec<u8> {
        let flags_byte = if end_stream { flags::END_STREAM } else { 0 };
        let mut frame = frame_with_header(frame_type::DATA, flags_byte, stream_id, data.len());
        frame.extend_from_slice(data);
        frame
    }

    /// Split a request body into DATA frames no larger than `max_frame_size`,
    /// END_STREAM on the last one.
    pub fn create_data_frames(stream_id: u32, body: &[u8], max_frame_size: u32) -> Vec<Vec<u8>> {
        let chunk_size = max_frame_size.max(1) as usize;
        if body.is_empty() {
            return vec![Self::create_data_frame(stream_id, &[], true)];
        }
        let chunk_count = body.len().div_ceil(chunk_size);
        body.chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| Self::create_data_frame(stream_id, chunk, i + 1 == chunk_count))
            .collect()
    }

    /// Create a RST_STREAM frame
    pub fn create_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
        let mut frame = frame_with_header(frame_type::RST_STREAM, 0, stream_id, 4);
        frame.extend_from_slice(&error_code.to_be_bytes());
        frame
    }

    /// Echo `data` back with the ACK flag.
    pub fn create_ping_ack(data: [u8; 8]) -> Vec<u8> {
        let mut frame = frame_with_header(frame_type::PING, flags::ACK, 0, 8);
        frame.extend_from_slice(&data);
        frame
    }

    /// Stream 0 targets the connection window.
    pub fn create_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
        let mut frame = frame_with_header(frame_type::WINDOW_UPDATE, 0, stream_id, 4);
        frame.extend_from_slice(&(increment & 0x7FFF_FFFF).to_be_bytes());
        frame
    }
}

fn frame_with_header(frame_type: u8, flags: u8, stream_id: u32, length: usize) -> Vec<u8> {
    let header = H2FrameHeader {
        length: length as u32,
        frame_type,
        flags,
        stream_id,
    };
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + length);
    frame.extend_from_slice(&header.encode());
    frame
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Strip DATA padding in place.
fn extract_data_payload(header: &H2FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::protocol("PADDED DATA frame with no payload"));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(Error::protocol("Invalid padding length in DATA frame"));
    }
    payload.truncate(payload.len() - pad_length);
    payload.remove(0);
    Ok(payload)
}

/// Header block fragment of a HEADERS payload, minus padding and priority fields.
fn extract_headers_payload(header: &H2FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>> {
    let mut offset = 0;
    let mut end = payload.len();

    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(Error::protocol("PADDED HEADERS frame with no payload"));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        if pad_length > payload.len() - offset {
            return Err(Error::protocol("Invalid padding length in HEADERS frame"));
        }
        end = payload.len() - pad_length;
    }

    if header.flags & flags::PRIORITY != 0 {
        if end < offset + 5 {
            return Err(Error::protocol("PRIORITY HEADERS frame with insufficient data"));
        }
        offset += 5; // Skip stream dependency (4 bytes) + weight (1 byte)
    }

    if offset == 0 && end == payload.len() {
        return Ok(payload);
    }

    payload.truncate(end);
    payload.drain(..offset);
    Ok(payload)
}
