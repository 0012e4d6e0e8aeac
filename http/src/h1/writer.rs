use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    body::BodyLength,
    http::{
        HeaderMap, StatusCode,
        header::{HeaderName, HeaderValue},
    },
    io::OutboundPart,
};

use super::{
    error::WriterError,
    proto::{
        error::{WriterOp, WriterState},
        state::CoordinatorState,
    },
};

/// Handle a handler drives its response through.
///
/// The writer observes three states: `NotCommitted` while the head draft is
/// still mutable, `Committed` once the head has been frozen and emitted, and
/// `Completed` after the terminal `End`. Every operation is validated against
/// the exchange state first; a rejected operation mutates nothing, emits
/// nothing and leaves the writer usable.
///
/// A fresh writer drafts a `200 OK` head with no headers.
pub struct ResponseWriter {
    state: Arc<Mutex<CoordinatorState>>,
    tx: mpsc::Sender<OutboundPart>,
}

impl ResponseWriter {
    pub(crate) fn new(state: Arc<Mutex<CoordinatorState>>, tx: mpsc::Sender<OutboundPart>) -> Self {
        Self { state, tx }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, part: OutboundPart) -> Result<(), WriterError> {
        self.tx.send(part).await.map_err(|_| WriterError::Closed)
    }

    /// Current writer state. Always observable.
    pub fn state(&self) -> WriterState {
        self.lock().writer_state()
    }

    pub fn status(&self) -> Result<StatusCode, WriterError> {
        self.lock().inspect_head(|head| head.status).map_err(Into::into)
    }

    pub fn content_type(&self) -> Result<Option<HeaderValue>, WriterError> {
        self.lock()
            .inspect_head(|head| head.content_type.cloned())
            .map_err(Into::into)
    }

    pub fn body_length(&self) -> Result<BodyLength, WriterError> {
        self.lock().inspect_head(|head| head.body_length).map_err(Into::into)
    }

    /// Clone of the draft or frozen header map.
    pub fn headers(&self) -> Result<HeaderMap, WriterError> {
        self.lock().inspect_head(|head| head.headers.clone()).map_err(Into::into)
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetStatus)
            .map(|draft| draft.status = status)
            .map_err(Into::into)
    }

    pub fn set_content_type(&mut self, value: HeaderValue) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetContentType)
            .map(|draft| draft.content_type = Some(value))
            .map_err(Into::into)
    }

    pub fn set_body_length(&mut self, length: BodyLength) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetBodyLength)
            .map(|draft| draft.body_length = length)
            .map_err(Into::into)
    }

    /// Replace the draft header map wholesale.
    pub fn set_headers(&mut self, headers: HeaderMap) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetHeaders)
            .map(|draft| draft.headers = headers)
            .map_err(Into::into)
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetHeaders)
            .map(|draft| {
                draft.headers.insert(name, value);
            })
            .map_err(Into::into)
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriterError> {
        self.lock()
            .draft_mut(WriterOp::SetHeaders)
            .map(|draft| {
                draft.headers.append(name, value);
            })
            .map_err(Into::into)
    }

    /// Give up connection reuse after this exchange.
    pub fn downgrade_keep_alive(&mut self) -> Result<(), WriterError> {
        self.lock().downgrade_keep_alive().map_err(Into::into)
    }

    /// Freeze the head and emit it. Afterwards the head is immutable and
    /// body parts may follow.
    pub async fn commit(&mut self) -> Result<(), WriterError> {
        let head = self.lock().commit()?;
        self.send(OutboundPart::Head(head)).await
    }

    /// Emit one body chunk. Empty chunks are skipped, not emitted.
    pub async fn body_part<B>(&mut self, bytes: B) -> Result<(), WriterError>
    where
        Bytes: From<B>,
    {
        let bytes = Bytes::from(bytes);
        if bytes.is_empty() {
            return Ok(());
        }
        self.lock().write_chunk(bytes.len() as u64)?;
        self.send(OutboundPart::Body(bytes)).await
    }

    /// Emit the terminal `End` of the response.
    pub async fn complete(&mut self) -> Result<(), WriterError> {
        self.lock().complete()?;
        self.send(OutboundPart::End).await
    }

    /// Commit the drafted head and complete without a body, as one
    /// transition.
    pub async fn commit_and_complete(&mut self) -> Result<(), WriterError> {
        let head = {
            let mut state = self.lock();
            let head = state.commit()?;
            state.complete()?;
            head
        };
        self.send(OutboundPart::Head(head)).await?;
        self.send(OutboundPart::End).await
    }

    /// Commit with the given body and complete, as one transition. `length`
    /// overrides the declared body length; it defaults to the buffer's exact
    /// byte count.
    pub async fn commit_and_complete_with<B>(&mut self, bytes: B, length: Option<u64>) -> Result<(), WriterError>
    where
        Bytes: From<B>,
    {
        let bytes = Bytes::from(bytes);
        let head = {
            let mut state = self.lock();
            state.draft_mut(WriterOp::SetBodyLength)?.body_length =
                BodyLength::Known(length.unwrap_or(bytes.len() as u64));
            let head = state.commit()?;
            if !bytes.is_empty() {
                state.write_chunk(bytes.len() as u64)?;
            }
            state.complete()?;
            head
        };

        self.send(OutboundPart::Head(head)).await?;
        if !bytes.is_empty() {
            self.send(OutboundPart::Body(bytes)).await?;
        }
        self.send(OutboundPart::End).await
    }
}
