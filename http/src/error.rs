//! error types.

use std::error::Error;

/// Default response body streaming error. Handler provided body streams can
/// fail with arbitrary error types; they are boxed at this boundary.
pub type BodyError = Box<dyn Error + Send + Sync>;
