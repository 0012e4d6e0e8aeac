use std::{
    collections::VecDeque,
    future::poll_fn,
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use bytes::{Bytes, BytesMut};
use futures_core::stream::Stream;

/// Buffered stream of request body chunks.
///
/// The receiving half of the single-producer single-consumer channel the
/// inbound side feeds. Chunks arrive lazily: the stream starts yielding
/// before the whole request is on the wire, and the channel's byte budget
/// back-pressures the inbound side when the consumer falls behind.
pub struct RequestBody(Arc<Mutex<Inner>>);

impl Default for RequestBody {
    /// An already finished body yielding no chunks.
    fn default() -> Self {
        let (mut tx, body) = Self::channel(0);
        tx.feed_eof();
        body
    }
}

impl RequestBody {
    pub(crate) fn channel(capacity: usize) -> (RequestBodySender, RequestBody) {
        let inner = Arc::new(Mutex::new(Inner::new(capacity)));
        (RequestBodySender(inner.clone()), RequestBody(inner))
    }

    /// Collect the remaining chunks into one contiguous buffer.
    pub async fn collect(mut self) -> io::Result<BytesMut> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = poll_fn(|cx| Pin::new(&mut self).poll_next(cx)).await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }
}

impl Stream for RequestBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        lock(&self.get_mut().0).poll_next_unpin(cx)
    }
}

impl Drop for RequestBody {
    fn drop(&mut self) {
        // unblock a producer suspended on back-pressure. Its sends become
        // no-ops from here on.
        lock(&self.0).wake_io();
    }
}

/// Sender half of the request body channel, owned by the inbound pump.
pub(crate) struct RequestBodySender(Arc<Mutex<Inner>>);

impl RequestBodySender {
    // the channel has exactly two owners and no weak references; a strong
    // count of one means the consumer is gone and feeding is pointless.
    fn try_inner(&mut self) -> Option<MutexGuard<'_, Inner>> {
        (Arc::strong_count(&self.0) != 1).then(|| lock(&self.0))
    }

    pub(crate) fn feed_data(&mut self, data: Bytes) {
        if let Some(mut inner) = self.try_inner() {
            inner.feed_data(data);
        }
    }

    pub(crate) fn feed_eof(&mut self) {
        if let Some(mut inner) = self.try_inner() {
            inner.feed_eof();
        }
    }

    pub(crate) fn feed_error(&mut self, e: io::Error) {
        if let Some(mut inner) = self.try_inner() {
            inner.feed_error(e);
        }
    }

    /// Wait until the channel has room for another chunk. Resolves
    /// immediately when the consumer dropped the body, so a pump draining an
    /// ignored request never stalls.
    pub(crate) async fn ready(&mut self) {
        poll_fn(|cx| match self.try_inner() {
            Some(mut inner) if inner.backpressure() && !inner.eof => {
                inner.register_io(cx);
                Poll::Pending
            }
            _ => Poll::Ready(()),
        })
        .await
    }
}

impl Drop for RequestBodySender {
    fn drop(&mut self) {
        if let Some(mut inner) = self.try_inner() {
            if !inner.eof {
                inner.feed_error(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    capacity: usize,
    eof: bool,
    err: Option<io::Error>,
    len: usize,
    items: VecDeque<Bytes>,
    task: Option<Waker>,
    io_task: Option<Waker>,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            eof: false,
            err: None,
            len: 0,
            items: VecDeque::new(),
            task: None,
            io_task: None,
        }
    }

    /// wake the consumer waiting for body data.
    fn wake(&mut self) {
        if let Some(waker) = self.task.take() {
            waker.wake();
        }
    }

    /// wake the producer waiting for buffer room.
    fn wake_io(&mut self) {
        if let Some(waker) = self.io_task.take() {
            waker.wake();
        }
    }

    fn register(&mut self, cx: &Context<'_>) {
        if self.task.as_ref().map(|w| !cx.waker().will_wake(w)).unwrap_or(true) {
            self.task = Some(cx.waker().clone());
        }
    }

    fn register_io(&mut self, cx: &Context<'_>) {
        if self.io_task.as_ref().map(|w| !cx.waker().will_wake(w)).unwrap_or(true) {
            self.io_task = Some(cx.waker().clone());
        }
    }

    fn feed_data(&mut self, data: Bytes) {
        if self.eof {
            return;
        }
        self.len += data.len();
        self.items.push_back(data);
        self.wake();
    }

    fn feed_eof(&mut self) {
        if self.eof {
            return;
        }
        self.eof = true;
        self.wake();
    }

    fn feed_error(&mut self, err: io::Error) {
        if self.eof {
            return;
        }
        self.err = Some(err);
        self.eof = true;
        self.wake();
    }

    fn backpressure(&self) -> bool {
        self.len >= self.capacity
    }

    fn poll_next_unpin(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        if let Some(data) = self.items.pop_front() {
            self.len -= data.len();
            self.wake_io();
            Poll::Ready(Some(Ok(data)))
        } else if let Some(err) = self.err.take() {
            // the error terminal is observed exactly once; the stream ends
            // afterwards.
            Poll::Ready(Some(Err(err)))
        } else if self.eof {
            Poll::Ready(None)
        } else {
            self.register(cx);
            self.wake_io();
            Poll::Pending
        }
    }
}
