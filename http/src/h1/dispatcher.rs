use std::{
    io,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use yoke_service::Service;

use crate::{
    config::ServiceConfig,
    http::Request,
    io::{InboundPart, InboundStream, OutboundPart, OutboundWriter, RequestHead},
};

use super::{
    body::{RequestBody, RequestBodySender},
    error::Error,
    proto::{
        error::ProtoError,
        head,
        state::{CoordinatorState, FrameAction, HeadAction},
    },
    writer::ResponseWriter,
};

/// Drive one accepted connection: coordinate exchanges between the framed
/// inbound stream, the service and the framed outbound writer until the peer
/// goes away, keep-alive ends, an error occurs or shutdown is requested.
///
/// The service is called exactly once per inbound head with the request and
/// its response writer. Exchanges are strictly sequential; the next head is
/// only read once both state machines returned to idle.
pub async fn run<I, W, S>(
    inbound: I,
    writer: W,
    service: &S,
    config: ServiceConfig,
    token: CancellationToken,
) -> Result<(), Error<S::Error>>
where
    I: InboundStream,
    W: OutboundWriter,
    S: Service<(Request<RequestBody>, ResponseWriter), Response = ()>,
{
    Dispatcher {
        inbound,
        writer,
        shared: Arc::new(Mutex::new(CoordinatorState::new())),
        service,
        config,
        token,
    }
    .run()
    .await
}

struct Dispatcher<'a, I, W, S> {
    inbound: I,
    writer: W,
    shared: Arc<Mutex<CoordinatorState>>,
    service: &'a S,
    config: ServiceConfig,
    token: CancellationToken,
}

impl<I, W, S> Dispatcher<'_, I, W, S>
where
    I: InboundStream,
    W: OutboundWriter,
    S: Service<(Request<RequestBody>, ResponseWriter), Response = ()>,
{
    async fn run(mut self) -> Result<(), Error<S::Error>> {
        loop {
            let deadline = Instant::now() + self.config.keep_alive_dur;

            let part = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    trace!(target: "h1_dispatcher", "shutdown requested; closing idle connection");
                    break;
                }
                res = self.inbound.next_part() => res?,
                _ = sleep_until(deadline) => {
                    trace!(target: "h1_dispatcher", "connection keep-alive expired; shutting down");
                    break;
                }
            };

            let head = match part {
                Some(InboundPart::Head(head)) => head,
                Some(InboundPart::Body(_)) => match lock(&self.shared).on_body() {
                    Ok(_) => continue,
                    Err(e) => return Err(e.into()),
                },
                Some(InboundPart::End) => match lock(&self.shared).on_end() {
                    Ok(_) => continue,
                    Err(e) => return Err(e.into()),
                },
                None => break,
            };

            let keep_alive = head::initial_keep_alive(head.version, &head.headers);
            match lock(&self.shared).on_head(head.version, keep_alive) {
                Ok(HeadAction::Start) => {}
                Ok(HeadAction::Ignore) => continue,
                Err(e) => return Err(e.into()),
            }

            self.exchange(head).await?;

            if !lock(&self.shared).is_keep_alive() {
                trace!(target: "h1_dispatcher", "exchange finished without keep-alive; closing");
                break;
            }
        }

        self.writer.finish().await?;
        Ok(())
    }

    /// One request/response exchange. Runs the service call, the inbound
    /// pump and the outbound drain cooperatively; the first error cancels
    /// the handler and the pump, flushes outbound parts that were already
    /// validated and tears the connection down.
    async fn exchange(&mut self, head: RequestHead) -> Result<(), Error<S::Error>> {
        let RequestHead {
            method,
            uri,
            version,
            headers,
        } = head;

        let (body_tx, body) = RequestBody::channel(self.config.body_buffer_capacity);
        let mut req = Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.version_mut() = version;
        *req.headers_mut() = headers;

        let (part_tx, part_rx) = mpsc::channel(self.config.write_queue_capacity);
        let res_writer = ResponseWriter::new(self.shared.clone(), part_tx);

        let service = self.service;
        let mut drain = pin!(drain_outbound(&mut self.writer, part_rx));
        let mut drain_done = false;

        let result = {
            let mut handler = pin!(async move { service.call((req, res_writer)).await.map_err(Error::Service) });
            let mut pump = pin!(pump_inbound(&mut self.inbound, body_tx, &self.shared));
            let (mut handler_done, mut pump_done) = (false, false);

            loop {
                if handler_done && pump_done && drain_done {
                    break Ok(());
                }

                tokio::select! {
                    res = &mut handler, if !handler_done => {
                        handler_done = true;
                        if let Err(e) = res {
                            // a protocol contract broken through the writer
                            // is the root cause; report it over the handler
                            // error.
                            break Err(match lock(&self.shared).take_failure() {
                                Some(f) => Error::Proto(f),
                                None => e,
                            });
                        }
                    }
                    res = &mut pump, if !pump_done => {
                        pump_done = true;
                        if let Err(e) = res {
                            break Err(Error::Proto(e));
                        }
                    }
                    res = &mut drain, if !drain_done => {
                        drain_done = true;
                        if let Err(e) = res {
                            break Err(e.into());
                        }
                    }
                }
            }
        };

        if let Err(e) = result {
            // the handler and pump are gone here and their queue handles
            // dropped with them. Parts the response side already validated
            // still reach the writer before the connection is torn down.
            if !drain_done {
                let _ = drain.await;
            }
            return Err(e);
        }

        let mut state = lock(&self.shared);
        if let Some(e) = state.take_failure() {
            return Err(Error::Proto(e));
        }
        state.finish_handling().map_err(Error::Proto)?;
        Ok(())
    }
}

/// Inbound half of an exchange: consume framed parts, advance the request
/// state machine and feed the body channel until end of message or reset.
async fn pump_inbound<I>(
    inbound: &mut I,
    mut tx: RequestBodySender,
    shared: &Arc<Mutex<CoordinatorState>>,
) -> Result<(), ProtoError>
where
    I: InboundStream,
{
    loop {
        // body channel back-pressure gates all inbound progress.
        tx.ready().await;

        match inbound.next_part().await {
            Ok(Some(InboundPart::Body(bytes))) => match lock(shared).on_body()? {
                FrameAction::Feed => tx.feed_data(bytes),
                FrameAction::Discard => {}
            },
            Ok(Some(InboundPart::End)) => {
                let act = lock(shared).on_end()?;
                if act.finish_channel {
                    tx.feed_eof();
                }
                return Ok(());
            }
            Ok(Some(InboundPart::Head(_))) => {
                lock(shared).on_stray_head()?;
            }
            Ok(None) => {
                // peer half-close mid exchange. The response in flight keeps
                // going and the connection closes after its end.
                trace!(target: "h1_dispatcher", "inbound half-close mid exchange");
                let act = lock(shared).on_reset();
                if act.finish_channel {
                    tx.feed_error(io::ErrorKind::UnexpectedEof.into());
                }
                return Ok(());
            }
            Err(e) => {
                warn!(target: "h1_dispatcher", "inbound framed stream failed: {e}");
                let act = lock(shared).on_reset();
                if act.finish_channel {
                    tx.feed_error(e);
                }
                return Ok(());
            }
        }
    }
}

/// Outbound half of an exchange: write queued parts in order until the
/// response end or until the writer handle is gone.
async fn drain_outbound<W>(writer: &mut W, mut rx: mpsc::Receiver<OutboundPart>) -> io::Result<()>
where
    W: OutboundWriter,
{
    while let Some(part) = rx.recv().await {
        let end = matches!(part, OutboundPart::End);
        writer.write_part(part).await?;
        if end {
            break;
        }
    }
    Ok(())
}

fn lock(shared: &Arc<Mutex<CoordinatorState>>) -> MutexGuard<'_, CoordinatorState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
