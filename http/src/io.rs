//! the framed message boundary between the exchange coordinator and an
//! external wire codec.
//!
//! A codec owns the raw octets: it parses HTTP/1.1 into [InboundPart] events
//! and serializes [OutboundPart] events back out (choosing chunked transfer
//! when an outbound head lacks `Content-Length`). The coordinator never sees
//! wire bytes, only these typed parts.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::http::{HeaderMap, Method, StatusCode, Uri, Version};

/// Head fields of one inbound request.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Head fields of one outbound response.
#[derive(Debug, PartialEq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// One framing event on the inbound side of a connection.
#[derive(Debug)]
pub enum InboundPart {
    Head(RequestHead),
    Body(Bytes),
    End,
}

/// One framing event on the outbound side of a connection.
#[derive(Debug, PartialEq)]
pub enum OutboundPart {
    Head(ResponseHead),
    Body(Bytes),
    End,
}

/// Source of inbound framing events, produced by a wire codec.
///
/// `Ok(None)` means the peer closed its sending direction; once returned the
/// stream must keep returning it.
pub trait InboundStream {
    /// Must be cancellation safe: a dropped call may not lose a part.
    fn next_part(&mut self) -> impl Future<Output = io::Result<Option<InboundPart>>>;
}

/// Ordered sink of outbound framing events, consumed by a wire codec.
pub trait OutboundWriter {
    fn write_part(&mut self, part: OutboundPart) -> impl Future<Output = io::Result<()>>;

    /// Flush whatever the codec buffers and shut the write direction down.
    /// No parts may be written afterwards.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>>;
}

/// An in-memory framed duplex: the server end implements the two boundary
/// traits, the client end injects inbound parts and observes outbound parts.
/// Used by embedders that frame elsewhere and by tests.
pub fn pipe(capacity: usize) -> (PipeClient, PipeReader, PipeWriter) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        PipeClient {
            tx: Some(in_tx),
            rx: out_rx,
        },
        PipeReader { rx: in_rx },
        PipeWriter { tx: Some(out_tx) },
    )
}

/// Client end of an in-memory framed duplex.
pub struct PipeClient {
    tx: Option<mpsc::Sender<io::Result<InboundPart>>>,
    rx: mpsc::Receiver<OutboundPart>,
}

impl PipeClient {
    /// Push one inbound part towards the server end.
    pub async fn send(&mut self, part: InboundPart) -> io::Result<()> {
        self.send_result(Ok(part)).await
    }

    /// Surface an io error to the server end's inbound stream.
    pub async fn send_error(&mut self, err: io::Error) -> io::Result<()> {
        self.send_result(Err(err)).await
    }

    async fn send_result(&mut self, res: io::Result<InboundPart>) -> io::Result<()> {
        match self.tx {
            Some(ref tx) => tx
                .send(res)
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe)),
            None => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    /// Close the inbound direction, simulating peer half-close.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Receive the next outbound part. `None` once the server end finished
    /// its writer (connection closed).
    pub async fn recv(&mut self) -> Option<OutboundPart> {
        self.rx.recv().await
    }
}

/// Server end inbound half of an in-memory framed duplex.
pub struct PipeReader {
    rx: mpsc::Receiver<io::Result<InboundPart>>,
}

impl InboundStream for PipeReader {
    async fn next_part(&mut self) -> io::Result<Option<InboundPart>> {
        self.rx.recv().await.transpose()
    }
}

/// Server end outbound half of an in-memory framed duplex.
pub struct PipeWriter {
    tx: Option<mpsc::Sender<OutboundPart>>,
}

impl OutboundWriter for PipeWriter {
    async fn write_part(&mut self, part: OutboundPart) -> io::Result<()> {
        match self.tx {
            Some(ref tx) => tx
                .send(part)
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe)),
            None => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }
}
