//! Response envelopes and streamed bodies.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Error that ended a body early, read once the channel has drained.
type FailureSlot = Arc<Mutex<Option<Error>>>;

/// Sending half of a response body, owned by the background reader.
#[derive(Debug, Clone)]
pub(crate) struct BodySender {
    tx: mpsc::Sender<Bytes>,
    failure: FailureSlot,
}

impl BodySender {
    /// Queue one chunk, waiting while the consumer is behind. Returns false
    /// once the [`Body`] has been dropped.
    pub(crate) async fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(chunk).await.is_ok()
    }

    /// End the body with `err`. The consumer still gets every chunk queued
    /// before it, then the error instead of end of body.
    pub(crate) fn fail(self, err: Error) {
        let mut slot = self.failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }
}

/// Tells the background reader which stream lost its consumer.
#[derive(Debug)]
pub(crate) struct CancelOnDrop {
    pub(crate) stream_id: u32,
    pub(crate) notify: mpsc::UnboundedSender<u32>,
}

/// Open a body channel holding up to `capacity` undelivered chunks.
pub(crate) fn body_channel(capacity: usize) -> (BodySender, Body) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let failure = FailureSlot::default();
    let sender = BodySender {
        tx,
        failure: Arc::clone(&failure),
    };
    let body = Body {
        rx: Some(rx),
        failure,
        cancel: None,
    };
    (sender, body)
}

/// Streamed response body.
///
/// Chunks arrive in DATA frame order. The stream ends (`None`) when the peer
/// closes the stream; an `Err` chunk means the stream or connection failed
/// before that. Dropping an unfinished body cancels its stream.
#[derive(Debug)]
pub struct Body {
    rx: Option<mpsc::Receiver<Bytes>>,
    failure: FailureSlot,
    cancel: Option<CancelOnDrop>,
}

impl Body {
    /// A body with no content.
    pub fn empty() -> Self {
        Self {
            rx: None,
            failure: FailureSlot::default(),
            cancel: None,
        }
    }

    /// A body already holding all of its bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        let (tx, body) = body_channel(1);
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = tx.tx.try_send(bytes);
        body
    }

    /// Report `cancel.stream_id` to the reader if this body is dropped
    /// before its end.
    pub(crate) fn cancel_on_drop(mut self, cancel: CancelOnDrop) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Called once the channel is closed and drained.
    fn finish(&mut self) -> Result<()> {
        self.rx = None;
        self.cancel = None;
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Next chunk, or `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        let rx = match self.rx.as_mut() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.recv().await {
            Some(bytes) => Ok(Some(bytes)),
            None => self.finish().map(|()| None),
        }
    }

    /// Drain the whole body into one buffer.
    pub async fn to_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The reader may already be gone; nothing is left to cancel then.
            let _ = cancel.notify.send(cancel.stream_id);
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let rx = match self.rx.as_mut() {
            Some(rx) => rx,
            None => return Poll::Ready(None),
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(None) => Poll::Ready(self.finish().err().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Header fields accumulated while one header block is being decoded.
#[derive(Debug, Default)]
pub(crate) struct PendingResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    malformed: Option<String>,
}

impl PendingResponse {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record one decoded field. Only the first problem is kept; decoding
    /// must still run to the end of the block to keep HPACK state in sync.
    pub(crate) fn add_field(&mut self, name: &[u8], value: &[u8]) {
        if self.malformed.is_some() {
            return;
        }
        if let Some(pseudo) = name.strip_prefix(b":") {
            if pseudo != b"status" {
                tracing::debug!(name = %String::from_utf8_lossy(name), "ignoring response pseudo-header");
                return;
            }
            match StatusCode::from_bytes(value) {
                Ok(status) if self.status.is_none() => self.status = Some(status),
                Ok(_) => self.malformed = Some("duplicate :status".to_string()),
                Err(_) => {
                    self.malformed = Some(format!(
                        "invalid :status {:?}",
                        String::from_utf8_lossy(value)
                    ))
                }
            }
            return;
        }
        let name = match HeaderName::from_bytes(name) {
            Ok(n) => n,
            Err(_) => {
                self.malformed = Some(format!(
                    "invalid header name {:?}",
                    String::from_utf8_lossy(name)
                ));
                return;
            }
        };
        match HeaderValue::from_bytes(value) {
            Ok(v) => {
                self.headers.append(name, v);
            }
            Err(_) => self.malformed = Some(format!("invalid value for header {name}")),
        }
    }

    /// True for a well-formed 1xx block, which precedes the final response.
    pub(crate) fn is_informational(&self) -> bool {
        self.malformed.is_none() && self.status.is_some_and(|s| s.is_informational())
    }

    /// Freeze the envelope around `body`.
    pub(crate) fn finish(self, body: Body) -> Result<Response<Body>> {
        if let Some(reason) = self.malformed {
            return Err(Error::protocol(format!("malformed response headers: {reason}")));
        }
        let status = self
            .status
            .ok_or_else(|| Error::protocol("response headers without :status"))?;
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = http::Version::HTTP_2;
        *response.headers_mut() = self.headers;
        Ok(response)
    }

    /// Headers decoded as trailers (no status expected).
    pub(crate) fn into_trailers(self) -> HeaderMap {
        self.headers
    }
}
