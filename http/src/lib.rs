//! Coordinated HTTP/1.1 request/response handling over a framed part boundary.
//!
//! This crate owns the lifecycle of one exchange at a time on a persistent
//! connection: it consumes typed inbound parts produced by an external wire
//! codec, exposes the request body as a lazy back-pressured byte stream,
//! invokes a user service exactly once per request head and emits typed
//! outbound parts in strict `Head, Body*, End` order. Wire level concerns
//! (socket accept, TLS, HTTP/1.1 octet parse/serialize) stay outside the
//! crate behind the [io] module traits.

#![forbid(unsafe_code)]

/// re-export of the [bytes] crate.
pub use bytes;

pub mod body;
pub mod config;
pub mod error;
pub mod h1;
pub mod http;
pub mod io;
pub mod server;

pub use self::body::{BodyLength, ResponseBody};
pub use self::config::ServiceConfig;
pub use self::error::BodyError;
pub use self::h1::{RequestBody, Responder, ResponseWriter};
pub use self::http::{Request, Response};
pub use self::io::{InboundPart, InboundStream, OutboundPart, OutboundWriter};
