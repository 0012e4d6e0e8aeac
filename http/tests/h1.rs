//! End to end exchange coordination over the in-memory framed pipe.

use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures_core::stream::Stream;
use tokio_util::sync::CancellationToken;
use yoke_service::fn_service;

use yoke_http::{
    BodyLength, Request, Response, ResponseBody, ServiceConfig,
    bytes::Bytes,
    h1::{self, RequestBody, Responder, ResponseWriter, WriterError},
    http::{
        IntoResponse, Method, StatusCode, Version,
        const_header_value::{OCTET_STREAM, TEXT},
        header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue},
    },
    io::{InboundPart, OutboundPart, PipeClient, RequestHead, pipe},
};

use yoke_http::h1::proto::error::{InvalidWriterState, ProtoError, WriterOp, WriterState};

fn head(method: Method, target: &str, version: Version, headers: &[(&str, &str)]) -> InboundPart {
    let mut head = RequestHead {
        method,
        uri: target.parse().unwrap(),
        version,
        headers: Default::default(),
    };
    for (name, value) in headers {
        head.headers
            .append(name.parse::<yoke_http::http::header::HeaderName>().unwrap(), value.parse().unwrap());
    }
    InboundPart::Head(head)
}

async fn expect_head(client: &mut PipeClient) -> yoke_http::io::ResponseHead {
    match client.recv().await {
        Some(OutboundPart::Head(head)) => head,
        other => panic!("expected outbound head, got {other:?}"),
    }
}

async fn expect_body(client: &mut PipeClient, bytes: &[u8]) {
    match client.recv().await {
        Some(OutboundPart::Body(b)) => assert_eq!(b, Bytes::copy_from_slice(bytes)),
        other => panic!("expected outbound body, got {other:?}"),
    }
}

async fn expect_end(client: &mut PipeClient) {
    match client.recv().await {
        Some(OutboundPart::End) => {}
        other => panic!("expected outbound end, got {other:?}"),
    }
}

#[tokio::test]
async fn buffer_response_on_keep_alive_connection() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer("hi", TEXT)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/a", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(head.headers.get(CONTENT_LENGTH).unwrap(), "2");

        expect_body(&mut client, b"hi").await;
        expect_end(&mut client).await;

        // the connection stays open for the next exchange until we leave.
        client.close();
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn request_body_streams_into_the_handler() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|req: Request<RequestBody>| async {
        let collected = req.into_body().collect().await.unwrap();
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer(collected.freeze(), OCTET_STREAM)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::POST, "/echo", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::Body(Bytes::from_static(b"foo"))).await.unwrap();
        client.send(InboundPart::Body(Bytes::from_static(b"bar"))).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert_eq!(head.headers.get(CONTENT_LENGTH).unwrap(), "6");

        expect_body(&mut client, b"foobar").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn connection_close_finishes_the_writer() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|req: Request<RequestBody>| async {
        let mut res = req.into_response(ResponseBody::none());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok::<_, Infallible>(res)
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client
            .send(head(Method::GET, "/", Version::HTTP_11, &[("connection", "close")]))
            .await
            .unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.status, StatusCode::NO_CONTENT);
        assert!(head.headers.get(CONTENT_LENGTH).is_none());
        assert!(head.headers.get(CONTENT_TYPE).is_none());

        expect_end(&mut client).await;

        // the outbound writer is finished without the peer closing first.
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

struct Chunks(std::vec::IntoIter<&'static str>);

impl Stream for Chunks {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.0.next().map(|s| Ok(Bytes::from_static(s.as_bytes()))))
    }
}

#[tokio::test]
async fn async_stream_response_without_content_length() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        let body = ResponseBody::stream(BodyLength::Unknown, TEXT, Chunks(vec!["a", "b", "c"].into_iter()));
        Ok::<_, Infallible>(Response::new(body))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert!(head.headers.get(CONTENT_LENGTH).is_none());

        expect_body(&mut client, b"a").await;
        expect_body(&mut client, b"b").await;
        expect_body(&mut client, b"c").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn empty_stream_chunks_are_skipped() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        let body = ResponseBody::stream(BodyLength::Unknown, TEXT, Chunks(vec!["a", "", "c"].into_iter()));
        Ok::<_, Infallible>(Response::new(body))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        expect_head(&mut client).await;
        expect_body(&mut client, b"a").await;
        // the empty chunk is dropped; "c" follows directly.
        expect_body(&mut client, b"c").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn writer_misuse_reports_and_recovers() {
    let (mut client, reader, writer) = pipe(8);

    let service = fn_service(|(_, mut writer): (Request<RequestBody>, ResponseWriter)| async move {
        match writer.body_part("x").await {
            Err(WriterError::State(InvalidWriterState { attempted, observed })) => {
                assert_eq!(attempted, WriterOp::WriteBodyPart);
                assert_eq!(observed, WriterState::NotCommitted);
            }
            other => panic!("expected writer misuse error, got {other:?}"),
        }

        // nothing was emitted and the draft is still mutable.
        assert_eq!(writer.state(), WriterState::NotCommitted);
        writer.commit_and_complete_with("ok", Some(2)).await
    });

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers.get(CONTENT_LENGTH).unwrap(), "2");
        expect_body(&mut client, b"ok").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn overlength_stream_body_is_fatal() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        let body = ResponseBody::stream(BodyLength::Known(3), TEXT, Chunks(vec!["ab", "cd"].into_iter()));
        Ok::<_, Infallible>(Response::new(body))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.headers.get(CONTENT_LENGTH).unwrap(), "3");
        expect_body(&mut client, b"ab").await;

        // the overflowing chunk is never emitted and no end follows.
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    match res {
        Err(h1::Error::Proto(ProtoError::OverlengthBody { declared, offered })) => {
            assert_eq!(declared, 3);
            assert_eq!(offered, 4);
        }
        other => panic!("expected overlength error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_request_body_terminates_with_zero_chunks() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|req: Request<RequestBody>| async {
        let collected = req.into_body().collect().await.unwrap();
        assert!(collected.is_empty());
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer("done", TEXT)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        expect_head(&mut client).await;
        expect_body(&mut client, b"done").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn keep_alive_chains_exchanges() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|req: Request<RequestBody>| async move {
        let target = req.uri().path().to_owned();
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer(target, TEXT)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        for target in ["/first", "/second", "/third"] {
            client.send(head(Method::GET, target, Version::HTTP_11, &[])).await.unwrap();
            client.send(InboundPart::End).await.unwrap();

            let head = expect_head(&mut client).await;
            assert_eq!(head.status, StatusCode::OK);
            expect_body(&mut client, target.as_bytes()).await;
            expect_end(&mut client).await;
        }
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn half_close_mid_exchange_closes_after_response() {
    let (mut client, reader, writer) = pipe(8);

    let service = fn_service(|(req, mut writer): (Request<RequestBody>, ResponseWriter)| async move {
        // the request body errors out on the half-close; respond regardless.
        let body = req.into_body().collect().await;
        assert!(body.is_err());
        writer.commit_and_complete_with("bye", None).await
    });

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::POST, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::Body(Bytes::from_static(b"partial"))).await.unwrap();
        client.close();

        expect_head(&mut client).await;
        expect_body(&mut client, b"bye").await;
        expect_end(&mut client).await;

        // keep-alive was downgraded; the connection is gone.
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn commit_complete_matches_compound_transition() {
    async fn run_one(granular: bool) -> Vec<OutboundPart> {
        let (mut client, reader, writer) = pipe(8);

        let service = fn_service(move |(_, mut writer): (Request<RequestBody>, ResponseWriter)| async move {
            if granular {
                writer.commit().await?;
                writer.complete().await
            } else {
                writer.commit_and_complete().await
            }
        });

        let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

        let drive = async {
            client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
            client.send(InboundPart::End).await.unwrap();

            let mut parts = Vec::new();
            parts.push(client.recv().await.unwrap());
            parts.push(client.recv().await.unwrap());
            client.close();
            assert!(client.recv().await.is_none());
            parts
        };

        let (res, parts) = tokio::join!(serve, drive);
        res.unwrap();
        parts
    }

    assert_eq!(run_one(true).await, run_one(false).await);
}

#[tokio::test]
async fn frames_before_head_abort_the_connection() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        Ok::<_, Infallible>(Response::new(ResponseBody::none()))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(InboundPart::Body(Bytes::from_static(b"junk"))).await.unwrap();
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    assert!(matches!(res, Err(h1::Error::Proto(ProtoError::UnexpectedFrame { .. }))));
}

#[tokio::test]
async fn second_head_mid_exchange_aborts_the_connection() {
    let (mut client, reader, writer) = pipe(8);

    // a handler waiting for the request body keeps the exchange open.
    let service = Responder::new(fn_service(|req: Request<RequestBody>| async {
        let collected = req.into_body().collect().await.unwrap();
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer(collected.freeze(), TEXT)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::POST, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(head(Method::GET, "/again", Version::HTTP_11, &[])).await.unwrap();
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    assert!(matches!(res, Err(h1::Error::Proto(ProtoError::UnexpectedFrame { .. }))));
}

#[tokio::test]
async fn handler_without_response_is_an_error() {
    let (mut client, reader, writer) = pipe(8);

    let service = fn_service(|(_, _writer): (Request<RequestBody>, ResponseWriter)| async move {
        // drop the writer without ever committing.
        Ok::<_, WriterError>(())
    });

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    assert!(matches!(
        res,
        Err(h1::Error::Proto(ProtoError::ResponseIncomplete { .. }))
    ));
}

#[tokio::test]
async fn http10_without_keep_alive_closes() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        Ok::<_, Infallible>(Response::new(ResponseBody::buffer("old", TEXT)))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_10, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.version, Version::HTTP_10);
        expect_body(&mut client, b"old").await;
        expect_end(&mut client).await;
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn idle_keep_alive_expiry_closes_cleanly() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        Ok::<_, Infallible>(Response::new(ResponseBody::none()))
    }));

    let config = ServiceConfig::new().keep_alive_dur(Duration::from_millis(20));
    let serve = h1::dispatcher::run(reader, writer, &service, config, CancellationToken::new());

    let drive = async {
        // never send anything; the idle timer closes the connection.
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn shutdown_token_closes_idle_connection() {
    let (mut client, reader, writer) = pipe(8);
    let token = CancellationToken::new();

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        Ok::<_, Infallible>(Response::new(ResponseBody::none()))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), token.clone());

    let drive = async {
        token.cancel();
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn sequence_body_is_produced_once_on_demand() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        let body = ResponseBody::sequence(BodyLength::Known(5), TEXT, || Bytes::from_static(b"fives"));
        Ok::<_, Infallible>(Response::new(body))
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.headers.get(CONTENT_LENGTH).unwrap(), "5");
        expect_body(&mut client, b"fives").await;
        expect_end(&mut client).await;
        client.close();
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}

#[tokio::test]
async fn user_headers_take_precedence_on_commit() {
    let (mut client, reader, writer) = pipe(8);

    let service = Responder::new(fn_service(|_: Request<RequestBody>| async {
        let mut res = Response::new(ResponseBody::buffer("x", TEXT));
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        Ok::<_, Infallible>(res)
    }));

    let serve = h1::dispatcher::run(reader, writer, &service, ServiceConfig::new(), CancellationToken::new());

    let drive = async {
        client.send(head(Method::GET, "/", Version::HTTP_11, &[])).await.unwrap();
        client.send(InboundPart::End).await.unwrap();

        let head = expect_head(&mut client).await;
        assert_eq!(head.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        expect_body(&mut client, b"x").await;
        expect_end(&mut client).await;

        // a `connection: close` response header downgrades keep-alive.
        assert!(client.recv().await.is_none());
    };

    let (res, _) = tokio::join!(serve, drive);
    res.unwrap();
}
