//! HTTP/1.1 exchange coordination: the per connection state machines, the
//! request body channel and the response writer facade.

pub mod dispatcher;
pub mod proto;

mod body;
mod error;
mod invoke;
mod writer;

pub use self::body::RequestBody;
pub use self::error::{Error, HandlerError, WriterError};
pub use self::invoke::Responder;
pub use self::writer::ResponseWriter;
