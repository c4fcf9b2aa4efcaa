//! Client side of one HTTP/2 connection.
//!
//! [`ClientConnection::handshake`] exchanges the preface and SETTINGS, then
//! spawns the connection's only reader. Requests are written under the
//! shared writer lock and wait on a one-shot slot that the reader fills when
//! the response header block completes.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use http::header::{HeaderName, HOST};
use http::request::Parts;
use http::{Request, Response, Uri};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::h2_codec::{
    error_code, flags, frame_type, settings_id, H2Codec, H2Event, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE,
    MAX_ALLOWED_FRAME_SIZE,
};
use crate::hpack::{H2Header, HpackDecoder};
use crate::response::{body_channel, Body, CancelOnDrop, PendingResponse};
use crate::stream_table::{Stream, StreamTable};
use crate::tls::SecureConnector;
use crate::writer::FrameWriter;

/// Headers that only make sense on an HTTP/1.1 hop.
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Settings the peer has advertised so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    /// Bound for every frame payload we send.
    pub max_frame_size: u32,
    pub max_concurrent_streams: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
        }
    }
}

impl PeerSettings {
    /// Apply one SETTINGS frame. Unknown identifiers are ignored.
    pub fn apply(&mut self, settings: &[(u16, u32)]) -> Result<()> {
        for &(id, value) in settings {
            match id {
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(Error::protocol(format!("SETTINGS_MAX_FRAME_SIZE {value} out of range")));
                    }
                    self.max_frame_size = value;
                }
                settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
                // fluke-hpack's encoder table cannot be resized; it stays at 4096.
                settings_id::HEADER_TABLE_SIZE => tracing::debug!(value, "peer HEADER_TABLE_SIZE"),
                _ => tracing::debug!(id, value, "unhandled setting"),
            }
        }
        Ok(())
    }
}

/// State shared by request submitters and the reader.
struct Shared<W> {
    writer: tokio::sync::Mutex<FrameWriter<W>>,
    streams: StreamTable,
    peer: Mutex<PeerSettings>,
}

impl<W: AsyncWrite + Unpin> Shared<W> {
    fn peer(&self) -> MutexGuard<'_, PeerSettings> {
        self.peer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply the peer's SETTINGS and acknowledge them.
    async fn apply_settings(&self, settings: &[(u16, u32)]) -> Result<()> {
        let max_frame_size = {
            let mut peer = self.peer();
            peer.apply(settings)?;
            peer.max_frame_size
        };
        let mut writer = self.writer.lock().await;
        writer.set_max_frame_size(max_frame_size);
        writer.write_settings_ack().await?;
        writer.flush().await
    }

    async fn reset_stream(&self, stream_id: u32, code: u32) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_rst_stream(stream_id, code).await?;
        writer.flush().await
    }
}

/// Handle to an established connection.
///
/// Dropping it lets the reader finish once every open stream has completed.
pub struct ClientConnection<S> {
    shared: Arc<Shared<WriteHalf<S>>>,
    _reader_guard: oneshot::Sender<()>,
}

impl<S> std::fmt::Debug for ClientConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("streams", &self.shared.streams.len())
            .finish_non_exhaustive()
    }
}

/// Connect through `connector`, check ALPN, then run the HTTP/2 handshake.
///
/// Nothing is written unless the negotiated protocol is exactly
/// `config.protocol` and was mutually agreed.
pub async fn connect<C: SecureConnector>(
    connector: &C,
    host: &str,
    port: u16,
    config: &ClientConfig,
) -> Result<ClientConnection<C::Stream>> {
    let protocols = [config.protocol.clone()];
    let (io, negotiated) = connector.connect(host, port, &protocols).await?;
    negotiated.verify(&config.protocol)?;
    ClientConnection::handshake(io, config).await
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Send the preface and our SETTINGS, require the peer's SETTINGS as the
    /// first frame, acknowledge it, and start the reader.
    pub async fn handshake(io: S, config: &ClientConfig) -> Result<Self> {
        let (mut reader, writer) = tokio::io::split(io);
        let mut writer = FrameWriter::new(writer);
        writer.write_raw(CONNECTION_PREFACE).await?;
        writer.write_settings(&config.settings).await?;
        writer.flush().await?;

        let mut codec = H2Codec::with_limits(config.local_max_frame_size(), config.max_header_block_size);
        let mut buf = vec![0u8; config.read_buffer_size];

        let first = loop {
            if let Some(header) = codec.peek_frame_header() {
                break header;
            }
            read_into(&mut reader, &mut buf, &mut codec).await?;
        };
        if first.frame_type != frame_type::SETTINGS {
            return Err(Error::UnexpectedFrame {
                expected: "SETTINGS",
                got: first.type_name(),
            });
        }
        if first.flags & flags::ACK != 0 {
            return Err(Error::protocol("SETTINGS ACK before the server's SETTINGS"));
        }

        let settings = loop {
            match codec.next_event()? {
                Some(H2Event::Settings { ack: false, settings }) => break settings,
                Some(other) => return Err(Error::protocol(format!("unexpected {other:?} during handshake"))),
                None => read_into(&mut reader, &mut buf, &mut codec).await?,
            }
        };
        tracing::debug!(?settings, "received server SETTINGS");

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(writer),
            streams: StreamTable::new(),
            peer: Mutex::new(PeerSettings::default()),
        });
        shared.apply_settings(&settings).await?;

        let (guard_tx, guard_rx) = oneshot::channel();
        let (cancel_tx, cancelled) = mpsc::unbounded_channel();
        let read_loop = ReadLoop {
            reader,
            buf,
            codec,
            decoder: HpackDecoder::with_max_table_size(config.header_table_size),
            shared: Arc::clone(&shared),
            handle_gone: guard_rx,
            cancel_tx,
            cancelled,
            body_channel_capacity: config.body_channel_capacity,
            replenish_window: config.replenish_window,
        };
        tokio::spawn(read_loop.run());

        Ok(Self {
            shared,
            _reader_guard: guard_tx,
        })
    }

    /// Submit one request and wait for its response header block.
    ///
    /// The body is read lazily from the returned response. A missing or empty
    /// request body sends END_STREAM on the HEADERS frame.
    pub async fn send_request(&self, request: Request<Option<Bytes>>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let fields = request_header_fields(&parts)?;
        let body = body.filter(|b| !b.is_empty());

        let (stream, response_rx) = {
            let mut writer = self.shared.writer.lock().await;
            if let Some(e) = writer.sticky_error() {
                return Err(e.into());
            }
            let (stream, response_rx) = self.shared.streams.allocate()?;
            if let Err(e) = write_request(&mut writer, &stream, &fields, body.as_deref()).await {
                self.shared.streams.remove(stream.id());
                return Err(e);
            }
            (stream, response_rx)
        };

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::connection_lost(format!(
                "reader stopped before stream {} got a response",
                stream.id()
            ))),
        }
    }

    /// Settings the peer has advertised.
    pub fn peer_settings(&self) -> PeerSettings {
        *self.shared.peer()
    }

    /// Streams still tracked by this connection.
    pub fn open_streams(&self) -> usize {
        self.shared.streams.len()
    }
}

async fn read_into<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8], codec: &mut H2Codec) -> Result<()> {
    let n = reader.read(buf).await?;
    if n == 0 {
        return Err(Error::connection_lost("connection closed by peer"));
    }
    codec.feed(&buf[..n]);
    Ok(())
}

async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    stream: &Stream,
    fields: &[H2Header],
    body: Option<&[u8]>,
) -> Result<()> {
    let stream_id = stream.id();
    for field in fields {
        tracing::trace!(stream_id, name = %field.name, value = %field.value, "sending header field");
    }
    writer.write_headers(stream_id, fields, body.is_none()).await?;
    if let Some(body) = body {
        writer.write_body(stream_id, body).await?;
    }
    writer.flush().await
}

/// Header list for `parts`: `:method`, `:scheme`, `:authority`, `:path`,
/// then every header with a lower-case name, then `host` if it was missing.
///
/// The authority is the `host` header when present, otherwise the URI's
/// lower-cased host and port.
pub fn request_header_fields(parts: &Parts) -> Result<Vec<H2Header>> {
    let host_header = parts
        .headers
        .get(HOST)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| Error::invalid_request("host header is not visible ASCII"))
        })
        .transpose()?;
    let authority = match &host_header {
        Some(host) => host.clone(),
        None => uri_authority(&parts.uri)?,
    };
    let scheme = parts.uri.scheme_str().unwrap_or("https");
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    let mut fields = vec![
        H2Header::new(":method", parts.method.as_str()),
        H2Header::new(":scheme", scheme),
        H2Header::new(":authority", authority.clone()),
        H2Header::new(":path", path),
    ];
    for (name, value) in &parts.headers {
        if is_connection_specific(name) {
            tracing::debug!(name = %name, "dropping connection-specific header");
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| Error::invalid_request(format!("value of header {name} is not visible ASCII")))?;
        // HeaderName is already lower case.
        fields.push(H2Header::new(name.as_str(), value));
    }
    if host_header.is_none() {
        fields.push(H2Header::new("host", authority));
    }
    Ok(fields)
}

fn uri_authority(uri: &Uri) -> Result<String> {
    let host = uri
        .host()
        .ok_or_else(|| Error::invalid_request(format!("request URI {uri} has no host")))?
        .to_ascii_lowercase();
    Ok(match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

fn is_connection_specific(name: &HeaderName) -> bool {
    CONNECTION_SPECIFIC_HEADERS.contains(&name.as_str())
}

/// The connection's only reader.
struct ReadLoop<S> {
    reader: ReadHalf<S>,
    buf: Vec<u8>,
    codec: H2Codec,
    decoder: HpackDecoder,
    shared: Arc<Shared<WriteHalf<S>>>,
    /// Resolves once the [`ClientConnection`] is dropped.
    handle_gone: oneshot::Receiver<()>,
    /// Cloned into every streamed body; see [`CancelOnDrop`].
    cancel_tx: mpsc::UnboundedSender<u32>,
    /// Streams whose body was dropped before its end.
    cancelled: mpsc::UnboundedReceiver<u32>,
    body_channel_capacity: usize,
    replenish_window: bool,
}

impl<S: AsyncRead + AsyncWrite> ReadLoop<S> {
    async fn run(mut self) {
        match self.drive().await {
            Ok(()) => {
                tracing::debug!("connection handle dropped and no streams open, reader done");
                self.shared.streams.fail_all("connection closed");
            }
            Err(e) => {
                tracing::debug!(error = %e, "connection reader stopped");
                self.shared.streams.fail_all(&e.to_string());
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut handle_dropped = false;
        loop {
            while let Some(event) = self.codec.next_event()? {
                self.handle_event(event).await?;
            }
            if handle_dropped && self.shared.streams.is_empty() {
                return Ok(());
            }
            tokio::select! {
                read = self.reader.read(&mut self.buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(Error::connection_lost("connection closed by peer"));
                    }
                    self.codec.feed(&self.buf[..n]);
                }
                _ = &mut self.handle_gone, if !handle_dropped => {
                    handle_dropped = true;
                }
                Some(stream_id) = self.cancelled.recv() => {
                    self.cancel_stream(stream_id).await?;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: H2Event) -> Result<()> {
        match event {
            H2Event::Headers {
                stream_id,
                header_block,
                end_stream,
            } => self.on_headers(stream_id, &header_block, end_stream).await,
            H2Event::Data {
                stream_id,
                data,
                end_stream,
                flow_controlled_len,
            } => self.on_data(stream_id, data, end_stream, flow_controlled_len).await,
            H2Event::Settings { ack: true, .. } => {
                tracing::trace!("SETTINGS acknowledged");
                Ok(())
            }
            H2Event::Settings { ack: false, settings } => {
                tracing::debug!(?settings, "received SETTINGS");
                self.shared.apply_settings(&settings).await
            }
            H2Event::Ping { ack: false, data } => {
                let mut writer = self.shared.writer.lock().await;
                writer.write_ping_ack(data).await?;
                writer.flush().await
            }
            H2Event::Ping { ack: true, .. } => Ok(()),
            H2Event::StreamReset { stream_id, error_code } => {
                match self.shared.streams.remove(stream_id) {
                    Some(stream) => stream.fail(Error::StreamReset { stream_id, error_code }),
                    None => tracing::debug!(stream_id, error_code, "RST_STREAM for unknown stream"),
                }
                Ok(())
            }
            H2Event::GoAway {
                last_stream_id,
                error_code,
            } => {
                tracing::debug!(last_stream_id, error_code, "received GOAWAY");
                let reason = format!("GOAWAY received (error code {error_code:#x})");
                self.shared.streams.close(&reason);
                for stream in self.shared.streams.drain_above(last_stream_id) {
                    stream.fail(Error::GoAway {
                        last_stream_id,
                        error_code,
                    });
                }
                Ok(())
            }
            H2Event::WindowUpdate { stream_id, increment } => {
                tracing::trace!(stream_id, increment, "WINDOW_UPDATE");
                Ok(())
            }
            H2Event::Ignored { stream_id, frame_type: kind } => {
                tracing::trace!(stream_id, frame_type = frame_type::name(kind), "ignoring frame");
                Ok(())
            }
        }
    }

    async fn on_headers(&mut self, stream_id: u32, block: &[u8], end_stream: bool) -> Result<()> {
        // Decode before anything else: the decoder's table must see every block.
        let mut pending = PendingResponse::new();
        self.decoder
            .decode_with(block, |name, value| pending.add_field(name, value))?;

        let stream = match self.shared.streams.lookup(stream_id) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(stream_id, error = %e, "dropping header block");
                return Ok(());
            }
        };

        if !stream.awaiting_response() {
            let trailers = pending.into_trailers();
            tracing::debug!(stream_id, count = trailers.len(), "received trailers");
            if end_stream {
                self.finish_stream(&stream);
            }
            return Ok(());
        }

        let informational = pending.is_informational();
        if informational && !end_stream {
            tracing::debug!(stream_id, "skipping informational response");
            return Ok(());
        }

        let (body_tx, body) = if end_stream {
            (None, Body::empty())
        } else {
            let (tx, body) = body_channel(self.body_channel_capacity);
            let body = body.cancel_on_drop(CancelOnDrop {
                stream_id,
                notify: self.cancel_tx.clone(),
            });
            (Some(tx), body)
        };
        let response = if informational {
            Err(Error::protocol("informational response with END_STREAM"))
        } else {
            pending.finish(body)
        };
        match response {
            Ok(response) => {
                tracing::debug!(stream_id, status = %response.status(), end_stream, "response headers");
                stream.deliver(response, body_tx);
                if end_stream {
                    self.finish_stream(&stream);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(stream_id, error = %e, "malformed response");
                self.shared.streams.remove(stream_id);
                stream.fail(e);
                if !end_stream {
                    self.shared.reset_stream(stream_id, error_code::PROTOCOL_ERROR).await?;
                }
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, stream_id: u32, data: Vec<u8>, end_stream: bool, flow_controlled_len: u32) -> Result<()> {
        let stream_open = match self.shared.streams.lookup(stream_id) {
            Ok(stream) => self.deliver_data(&stream, data, end_stream).await?,
            Err(e) => {
                tracing::warn!(stream_id, error = %e, "dropping DATA");
                false
            }
        };

        if self.replenish_window && flow_controlled_len > 0 {
            let mut writer = self.shared.writer.lock().await;
            writer.write_window_update(0, flow_controlled_len).await?;
            if stream_open {
                writer.write_window_update(stream_id, flow_controlled_len).await?;
            }
            writer.flush().await?;
        }
        Ok(())
    }

    /// Push `data` into the stream's body. Returns whether the stream is
    /// still open afterwards.
    async fn deliver_data(&mut self, stream: &Arc<Stream>, data: Vec<u8>, end_stream: bool) -> Result<bool> {
        let stream_id = stream.id();
        if stream.awaiting_response() {
            tracing::warn!(stream_id, "DATA before response headers");
            self.shared.streams.remove(stream_id);
            stream.fail(Error::protocol(format!("DATA before HEADERS on stream {stream_id}")));
            if !end_stream {
                self.shared.reset_stream(stream_id, error_code::PROTOCOL_ERROR).await?;
            }
            return Ok(false);
        }

        if !data.is_empty() {
            if let Some(body_tx) = stream.body_sender() {
                tracing::trace!(stream_id, len = data.len(), end_stream, "DATA");
                if !body_tx.send(Bytes::from(data)).await {
                    tracing::debug!(stream_id, "response body dropped, cancelling stream");
                    self.finish_stream(stream);
                    if !end_stream {
                        self.shared.reset_stream(stream_id, error_code::CANCEL).await?;
                    }
                    return Ok(false);
                }
            }
        }

        if end_stream {
            self.finish_stream(stream);
            return Ok(false);
        }
        Ok(true)
    }

    /// The consumer dropped an unfinished body: stop the peer sending it.
    async fn cancel_stream(&mut self, stream_id: u32) -> Result<()> {
        let Some(stream) = self.shared.streams.remove(stream_id) else {
            return Ok(());
        };
        tracing::debug!(stream_id, "response body dropped, cancelling stream");
        stream.close_body();
        self.shared.reset_stream(stream_id, error_code::CANCEL).await
    }

    /// Close the body and forget the stream.
    fn finish_stream(&self, stream: &Stream) {
        stream.close_body();
        self.shared.streams.remove(stream.id());
    }
}
