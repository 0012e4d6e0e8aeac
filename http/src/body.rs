//! HTTP response body types.

use std::{
    error, fmt,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::stream::Stream;
use pin_project_lite::pin_project;

use crate::{error::BodyError, http::header::HeaderValue};

/// Declared length of a response body.
///
/// [BodyLength::Known] is emitted as `Content-Length` and acts as an upper
/// bound contract: the body producer must not offer more bytes than declared.
/// [BodyLength::Unknown] omits `Content-Length`; a wire codec is expected to
/// fall back to chunked transfer when body parts follow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyLength {
    Known(u64),
    Unknown,
}

/// Producer closure of a [ResponseBody::Sequence] body. Invoked at most once.
pub type SequenceProducer = Box<dyn FnOnce() -> Bytes + Send>;

/// A closed sum of the body shapes a handler can respond with.
pub enum ResponseBody {
    /// no body at all. `Content-Type` and `Content-Length` are both skipped.
    None,
    /// a body already materialized in memory.
    Buffer {
        bytes: Bytes,
        content_type: Option<HeaderValue>,
    },
    /// a finite body produced synchronously on demand. The producer is
    /// invoked exactly once when the response is emitted.
    Sequence {
        length: BodyLength,
        content_type: Option<HeaderValue>,
        producer: SequenceProducer,
    },
    /// an async stream of body chunks, emitted as they resolve.
    Stream {
        length: BodyLength,
        content_type: Option<HeaderValue>,
        stream: BoxStream,
    },
}

impl ResponseBody {
    #[inline]
    pub const fn none() -> Self {
        Self::None
    }

    pub fn buffer<B>(bytes: B, content_type: HeaderValue) -> Self
    where
        Bytes: From<B>,
    {
        Self::Buffer {
            bytes: Bytes::from(bytes),
            content_type: Some(content_type),
        }
    }

    pub fn sequence<F>(length: BodyLength, content_type: HeaderValue, producer: F) -> Self
    where
        F: FnOnce() -> Bytes + Send + 'static,
    {
        Self::Sequence {
            length,
            content_type: Some(content_type),
            producer: Box::new(producer),
        }
    }

    pub fn stream<S, E>(length: BodyLength, content_type: HeaderValue, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: error::Error + Send + Sync + 'static,
    {
        Self::Stream {
            length,
            content_type: Some(content_type),
            stream: BoxStream::new(stream),
        }
    }

    /// content type carried by the body variant, if any.
    pub fn content_type(&self) -> Option<&HeaderValue> {
        match self {
            Self::None => None,
            Self::Buffer { content_type, .. }
            | Self::Sequence { content_type, .. }
            | Self::Stream { content_type, .. } => content_type.as_ref(),
        }
    }

    /// declared body length. [ResponseBody::None] has no length at all and
    /// a buffer body is always exactly its byte count.
    pub fn length(&self) -> Option<BodyLength> {
        match self {
            Self::None => None,
            Self::Buffer { bytes, .. } => Some(BodyLength::Known(bytes.len() as u64)),
            Self::Sequence { length, .. } | Self::Stream { length, .. } => Some(*length),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("ResponseBody::None"),
            Self::Buffer { bytes, .. } => write!(f, "ResponseBody::Buffer({} bytes)", bytes.len()),
            Self::Sequence { length, .. } => write!(f, "ResponseBody::Sequence({length:?})"),
            Self::Stream { length, .. } => write!(f, "ResponseBody::Stream({length:?})"),
        }
    }
}

macro_rules! buffer_impl {
    ($ty: ty) => {
        impl From<$ty> for ResponseBody {
            fn from(item: $ty) -> Self {
                Self::Buffer {
                    bytes: Bytes::from(item),
                    content_type: None,
                }
            }
        }
    };
}

buffer_impl!(Bytes);
buffer_impl!(&'static [u8]);
buffer_impl!(&'static str);
buffer_impl!(Vec<u8>);
buffer_impl!(String);

/// type erased response body stream.
pub struct BoxStream(Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>);

impl BoxStream {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: error::Error + Send + Sync + 'static,
    {
        Self(Box::pin(BoxStreamMapErr { stream }))
    }
}

impl Stream for BoxStream {
    type Item = Result<Bytes, BodyError>;

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().0.as_mut().poll_next(cx)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

pin_project! {
    struct BoxStreamMapErr<S> {
        #[pin]
        stream: S
    }
}

impl<S, T, E> Stream for BoxStreamMapErr<S>
where
    S: Stream<Item = Result<T, E>>,
    E: error::Error + Send + Sync + 'static,
{
    type Item = Result<T, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .stream
            .poll_next(cx)
            .map_err(|e| BodyError::from(Box::new(e) as Box<dyn error::Error + Send + Sync>))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
