//! Outbound write path.
//!
//! Every frame leaves through one [`FrameWriter`]: a buffered writer over a
//! [`StickyErrWriter`]. The HPACK encoder lives next to it because encoder
//! state must follow wire order, so encoding and writing happen under the
//! same lock.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::Result;
use crate::h2_codec::{H2Codec, DEFAULT_MAX_FRAME_SIZE};
use crate::hpack::{H2Header, HpackEncoder};

/// Writer that remembers its first failure.
///
/// Once a write, flush or shutdown fails, every later call returns an error of
/// the same kind and message without touching the inner writer.
#[derive(Debug)]
pub struct StickyErrWriter<W> {
    inner: W,
    err: Option<(io::ErrorKind, String)>,
}

impl<W> StickyErrWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, err: None }
    }

    /// The first error seen, if any.
    pub fn sticky_error(&self) -> Option<io::Error> {
        self.err
            .as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()))
    }

    fn record<T>(&mut self, res: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if let Poll::Ready(Err(e)) = &res {
            if self.err.is_none() {
                self.err = Some((e.kind(), e.to_string()));
            }
        }
        res
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for StickyErrWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Some(e) = self.sticky_error() {
            return Poll::Ready(Err(e));
        }
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        self.record(res)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(e) = self.sticky_error() {
            return Poll::Ready(Err(e));
        }
        let res = Pin::new(&mut self.inner).poll_flush(cx);
        self.record(res)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(e) = self.sticky_error() {
            return Poll::Ready(Err(e));
        }
        let res = Pin::new(&mut self.inner).poll_shutdown(cx);
        self.record(res)
    }
}

/// Frame-level writer shared by request submission and the background reader.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: BufWriter<StickyErrWriter<W>>,
    encoder: HpackEncoder,
    /// Peer's SETTINGS_MAX_FRAME_SIZE; bounds every outbound payload.
    max_frame_size: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            io: BufWriter::new(StickyErrWriter::new(inner)),
            encoder: HpackEncoder::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Queue raw bytes (the connection preface, or an already-built frame).
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes).await?;
        Ok(())
    }

    pub async fn write_settings(&mut self, settings: &[(u16, u32)]) -> Result<()> {
        self.write_raw(&H2Codec::create_settings(settings)).await
    }

    pub async fn write_settings_ack(&mut self) -> Result<()> {
        self.write_raw(&H2Codec::create_settings_ack()).await
    }

    pub async fn write_ping_ack(&mut self, data: [u8; 8]) -> Result<()> {
        self.write_raw(&H2Codec::create_ping_ack(data)).await
    }

    pub async fn write_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        self.write_raw(&H2Codec::create_window_update(stream_id, increment)).await
    }

    pub async fn write_rst_stream(&mut self, stream_id: u32, error_code: u32) -> Result<()> {
        self.write_raw(&H2Codec::create_rst_stream(stream_id, error_code)).await
    }

    /// HPACK-encode `fields` and queue them as HEADERS + CONTINUATION frames.
    pub async fn write_headers(&mut self, stream_id: u32, fields: &[H2Header], end_stream: bool) -> Result<()> {
        let block = self.encoder.encode(fields);
        let frames = H2Codec::create_header_block_frames(stream_id, &block, self.max_frame_size, end_stream);
        tracing::trace!(stream_id, block_len = block.len(), frames = frames.len(), "writing header block");
        for frame in frames {
            self.write_raw(&frame).await?;
        }
        Ok(())
    }

    /// Queue a request body as DATA frames, END_STREAM on the last one.
    pub async fn write_body(&mut self, stream_id: u32, body: &[u8]) -> Result<()> {
        for frame in H2Codec::create_data_frames(stream_id, body, self.max_frame_size) {
            self.write_raw(&frame).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// First write error, if the connection's write side has failed.
    pub fn sticky_error(&self) -> Option<io::Error> {
        self.io.get_ref().sticky_error()
    }
}
