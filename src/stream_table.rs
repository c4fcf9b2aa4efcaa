//! Stream table: the only map from stream identifier to in-flight request.
//!
//! Insertion happens on request submission, lookup and removal from the
//! background reader. One `std::sync::Mutex` guards both; it is never held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use http::Response;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::response::{Body, BodySender};

/// Largest stream identifier (2^31 - 1).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Receiving side of a stream's one-shot response slot.
pub type ResponseReceiver = oneshot::Receiver<Result<Response<Body>>>;

/// One request/response exchange.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: Mutex<StreamState>,
}

#[derive(Debug)]
struct StreamState {
    /// Taken when the response envelope (or an error) is delivered.
    response_tx: Option<oneshot::Sender<Result<Response<Body>>>>,
    /// Write side of the body; dropped to signal end of body.
    body_tx: Option<BodySender>,
}

impl Stream {
    fn new(id: u32, response_tx: oneshot::Sender<Result<Response<Body>>>) -> Self {
        Self {
            id,
            state: Mutex::new(StreamState {
                response_tx: Some(response_tx),
                body_tx: None,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True until the response envelope or an error has been handed over.
    pub fn awaiting_response(&self) -> bool {
        self.state().response_tx.is_some()
    }

    /// Hand the caller its response. The body's write side, if any, is kept
    /// for DATA frames. Returns false if the slot was already used.
    pub(crate) fn deliver(&self, response: Response<Body>, body_tx: Option<BodySender>) -> bool {
        let mut state = self.state();
        match state.response_tx.take() {
            Some(tx) => {
                state.body_tx = body_tx;
                // A dropped receiver means the caller stopped waiting.
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Clone of the body's write side, if a body is open.
    pub(crate) fn body_sender(&self) -> Option<BodySender> {
        self.state().body_tx.clone()
    }

    /// Close the body's write side: end of body for the consumer.
    pub(crate) fn close_body(&self) {
        self.state().body_tx = None;
    }

    /// Resolve the stream with an error: the waiting caller gets it if the
    /// response was not yet delivered, otherwise the body reader does.
    pub(crate) fn fail(&self, err: Error) {
        let mut state = self.state();
        if let Some(tx) = state.response_tx.take() {
            let _ = tx.send(Err(err));
            state.body_tx = None;
            return;
        }
        if let Some(body_tx) = state.body_tx.take() {
            body_tx.fail(err);
        }
    }
}

#[derive(Debug)]
struct TableInner {
    next_stream_id: u32,
    streams: HashMap<u32, Arc<Stream>>,
    /// Set once the background reader has ended; no new stream can be served.
    closed: Option<String>,
}

/// Stream table for one connection.
#[derive(Debug)]
pub struct StreamTable {
    inner: Mutex<TableInner>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                next_stream_id: 1,
                streams: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new stream under the next odd identifier.
    pub fn allocate(&self) -> Result<(Arc<Stream>, ResponseReceiver)> {
        let mut inner = self.inner();
        if let Some(reason) = &inner.closed {
            return Err(Error::connection_lost(reason.clone()));
        }
        let id = inner.next_stream_id;
        if id > MAX_STREAM_ID {
            return Err(Error::StreamIdsExhausted);
        }
        let (tx, rx) = oneshot::channel();
        let stream = Arc::new(Stream::new(id, tx));
        inner.streams.insert(id, Arc::clone(&stream));
        inner.next_stream_id += 2;
        Ok((stream, rx))
    }

    /// Stream registered under `id`.
    pub fn lookup(&self, id: u32) -> Result<Arc<Stream>> {
        self.inner()
            .streams
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownStream(id))
    }

    /// Forget a finished stream.
    pub fn remove(&self, id: u32) -> Option<Arc<Stream>> {
        self.inner().streams.remove(&id)
    }

    /// Number of streams still tracked.
    pub fn len(&self) -> usize {
        self.inner().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier the next allocation will use.
    pub fn next_stream_id(&self) -> u32 {
        self.inner().next_stream_id
    }

    /// Remove and return every stream with an identifier above `last_stream_id`.
    pub(crate) fn drain_above(&self, last_stream_id: u32) -> Vec<Arc<Stream>> {
        let mut inner = self.inner();
        let ids: Vec<u32> = inner
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last_stream_id)
            .collect();
        ids.iter().filter_map(|id| inner.streams.remove(id)).collect()
    }

    /// Refuse further allocations; existing streams are untouched.
    pub(crate) fn close(&self, reason: &str) {
        self.inner().closed.get_or_insert_with(|| reason.to_string());
    }

    /// Mark the table closed and fail every remaining stream. Later
    /// allocations fail with the same reason.
    pub(crate) fn fail_all(&self, reason: &str) {
        let streams: Vec<Arc<Stream>> = {
            let mut inner = self.inner();
            inner.closed.get_or_insert_with(|| reason.to_string());
            inner.streams.drain().map(|(_, s)| s).collect()
        };
        for stream in streams {
            stream.fail(Error::connection_lost(reason));
        }
    }
}
