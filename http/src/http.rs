//! re-export of [http] crate types.

pub use ::http::*;

/// Some often used header value.
#[allow(clippy::declare_interior_mutable_const)]
pub mod const_header_value {
    use ::http::header::HeaderValue;

    macro_rules! const_value {
        ($(($ident: ident, $expr: expr)), *) => {
            $(
               pub const $ident: HeaderValue = HeaderValue::from_static($expr);
            )*
        }
    }

    const_value!(
        (TEXT, "text/plain"),
        (TEXT_UTF8, "text/plain; charset=utf-8"),
        (TEXT_HTML_UTF8, "text/html; charset=utf-8"),
        (JSON, "application/json"),
        (OCTET_STREAM, "application/octet-stream")
    );
}

/// helper trait for converting a [Request] to [Response].
///
/// Re-uses the request's header map allocation for the response, which is
/// handy for handlers that answer from the request they were given.
pub trait IntoResponse<B> {
    fn into_response(self, body: B) -> Response<B>;
}

impl<ReqB, B> IntoResponse<B> for Request<ReqB> {
    fn into_response(self, body: B) -> Response<B> {
        let (request::Parts { mut headers, .. }, _) = self.into_parts();
        headers.clear();

        let mut res = Response::new(body);
        *res.headers_mut() = headers;
        res
    }
}
