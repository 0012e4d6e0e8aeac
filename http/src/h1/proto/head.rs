use crate::{
    body::BodyLength,
    http::{
        StatusCode, Version,
        header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue},
    },
    io::ResponseHead,
};

/// The mutable response head under composition. Lives inside the response
/// state until commit freezes it.
pub(crate) struct ResponseDraft {
    pub(crate) status: StatusCode,
    pub(crate) content_type: Option<HeaderValue>,
    pub(crate) body_length: BodyLength,
    pub(crate) headers: HeaderMap,
}

impl ResponseDraft {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: None,
            body_length: BodyLength::Unknown,
            headers: HeaderMap::new(),
        }
    }
}

/// The committed response head. Retained for observation until the exchange
/// resets.
pub(crate) struct FrozenHead {
    pub(crate) status: StatusCode,
    pub(crate) content_type: Option<HeaderValue>,
    pub(crate) body_length: BodyLength,
    pub(crate) headers: HeaderMap,
}

/// Compute the effective response head once, at commit.
///
/// Handler provided headers win over the values derived from the draft's
/// content type and body length. The response version mirrors the request
/// version. Returns the head to emit, the retained frozen copy and the byte
/// length enforced on body parts, taken from the content-length the peer
/// actually sees so the budget and the wire contract cannot disagree.
pub(crate) fn freeze(version: Version, draft: ResponseDraft) -> (ResponseHead, FrozenHead, Option<u64>) {
    let ResponseDraft {
        status,
        content_type,
        body_length,
        mut headers,
    } = draft;

    if let Some(ref value) = content_type {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, value.clone());
        }
    }

    let declared = match headers.get(CONTENT_LENGTH) {
        Some(value) => parse_content_length(value),
        None => match body_length {
            BodyLength::Known(n) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(n));
                Some(n)
            }
            BodyLength::Unknown => None,
        },
    };

    let head = ResponseHead {
        version,
        status,
        headers: headers.clone(),
    };
    let frozen = FrozenHead {
        status,
        content_type,
        body_length,
        headers,
    };

    (head, frozen, declared)
}

// a header that does not parse as a length is passed through unenforced;
// what it means on the wire is between the handler and its peer.
fn parse_content_length(value: &HeaderValue) -> Option<u64> {
    value.to_str().ok().and_then(|v| v.trim().parse().ok())
}

/// Whether a committed response asks for the connection to close.
pub(crate) fn has_connection_close(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    })
}

/// Initial keep-alive value derived from the request head: on for HTTP/1.1
/// unless the peer asked to close, off for HTTP/1.0 unless it asked to keep
/// the connection. `close` wins over `keep-alive` when both appear.
pub(crate) fn initial_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let mut keep_alive = version != Version::HTTP_10;

    for value in headers.get_all(CONNECTION) {
        let Ok(value) = value.to_str() else { continue };
        for token in value.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }

    keep_alive
}
