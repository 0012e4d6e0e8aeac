use std::{fmt, io};

use crate::error::BodyError;

use super::proto::{
    error::{InvalidWriterState, ProtoError},
    state::WriterFailure,
};

/// Connection level error of the exchange coordination. Nothing in here is
/// retried; every variant terminates the connection.
pub enum Error<S> {
    /// peer went away mid connection.
    Closed,
    /// service error. terminate connection right away.
    Service(S),
    /// framed boundary io error. terminate connection right away.
    Io(io::Error),
    /// protocol error. terminate connection right away.
    Proto(ProtoError),
}

impl<S> fmt::Debug for Error<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Closed => f.write_str("connection closed"),
            Self::Service(ref e) => fmt::Debug::fmt(e, f),
            Self::Io(ref e) => fmt::Debug::fmt(e, f),
            Self::Proto(ref e) => fmt::Debug::fmt(e, f),
        }
    }
}

impl<S> From<ProtoError> for Error<S> {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}

impl<S> From<io::Error> for Error<S> {
    fn from(e: io::Error) -> Self {
        use io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::WriteZero => {
                Self::Closed
            }
            _ => Self::Io(e),
        }
    }
}

/// Failure surfaced to a handler through the response writer. Only the
/// [WriterError::State] variant is recoverable: the writer stays usable and
/// nothing was emitted or mutated.
#[derive(Debug)]
pub enum WriterError {
    /// operation attempted in a writer state that does not allow it.
    State(InvalidWriterState),
    /// the exchange broke a protocol contract; the connection will close.
    Proto(ProtoError),
    /// the connection is gone and nothing can be emitted anymore.
    Closed,
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::State(ref e) => fmt::Display::fmt(e, f),
            Self::Proto(ref e) => fmt::Display::fmt(e, f),
            Self::Closed => f.write_str("connection closed"),
        }
    }
}

impl std::error::Error for WriterError {}

impl From<InvalidWriterState> for WriterError {
    fn from(e: InvalidWriterState) -> Self {
        Self::State(e)
    }
}

impl From<WriterFailure> for WriterError {
    fn from(e: WriterFailure) -> Self {
        match e {
            WriterFailure::State(e) => Self::State(e),
            WriterFailure::Fatal(e) => Self::Proto(e),
        }
    }
}

/// Error type of services adapted by [Responder](super::Responder).
pub enum HandlerError<E> {
    /// the wrapped service errored.
    Service(E),
    /// the response body stream errored mid flight. The response is
    /// truncated without a terminal `End`.
    Body(BodyError),
    /// a connection side failure surfaced through the response writer.
    Writer(WriterError),
}

impl<E> fmt::Debug for HandlerError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Service(ref e) => fmt::Debug::fmt(e, f),
            Self::Body(ref e) => fmt::Debug::fmt(e, f),
            Self::Writer(ref e) => fmt::Debug::fmt(e, f),
        }
    }
}

impl<E> From<WriterError> for HandlerError<E> {
    fn from(e: WriterError) -> Self {
        Self::Writer(e)
    }
}
