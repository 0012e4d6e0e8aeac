use std::mem;

use crate::{
    body::BodyLength,
    http::{
        StatusCode, Version,
        header::{HeaderMap, HeaderValue},
    },
    io::ResponseHead,
};

use super::{
    error::{InboundEvent, InvalidWriterState, ProtoError, RequestPhase, ResponsePhase, WriterOp, WriterState},
    head::{self, FrozenHead, ResponseDraft},
};

/// Request half of an exchange. The body channel sender is owned by the
/// inbound pump, not by the state value; transitions return the action the
/// pump must perform on it so the channel is finished exactly once.
enum RequestState {
    Idle,
    AwaitingBody,
    ReceivingBody,
    AwaitingResponseComplete,
    StreamReset,
}

/// Response half of an exchange. The per exchange head context (draft before
/// commit, frozen head after) moves between variants by value.
enum ResponseState {
    Idle,
    PendingHead {
        draft: ResponseDraft,
    },
    PendingBody {
        head: FrozenHead,
        budget: Option<BodyBudget>,
    },
    SendingBody {
        head: FrozenHead,
        budget: Option<BodyBudget>,
    },
    AwaitingRequestComplete {
        head: FrozenHead,
    },
    AwaitingHandlingComplete {
        head: FrozenHead,
    },
}

/// Byte budget of a committed response, derived from the content-length
/// emitted on its head.
#[derive(Clone, Copy)]
struct BodyBudget {
    declared: u64,
    remaining: u64,
}

impl ResponseState {
    fn writer_state(&self) -> WriterState {
        match self {
            Self::PendingHead { .. } => WriterState::NotCommitted,
            Self::PendingBody { .. } | Self::SendingBody { .. } => WriterState::Committed,
            Self::Idle | Self::AwaitingRequestComplete { .. } | Self::AwaitingHandlingComplete { .. } => {
                WriterState::Completed
            }
        }
    }

    fn phase(&self) -> ResponsePhase {
        match self {
            Self::Idle => ResponsePhase::Idle,
            Self::PendingHead { .. } => ResponsePhase::PendingHead,
            Self::PendingBody { .. } => ResponsePhase::PendingBody,
            Self::SendingBody { .. } => ResponsePhase::SendingBody,
            Self::AwaitingRequestComplete { .. } => ResponsePhase::AwaitingRequestComplete,
            Self::AwaitingHandlingComplete { .. } => ResponsePhase::AwaitingHandlingComplete,
        }
    }
}

/// Outcome of an inbound head observed by the connection loop.
pub(crate) enum HeadAction {
    /// start a new exchange and publish the request.
    Start,
    /// inbound side was reset; drop the head.
    Ignore,
}

/// Outcome of an inbound body chunk.
pub(crate) enum FrameAction {
    /// deliver the chunk to the request body channel.
    Feed,
    /// drop the chunk without delivery.
    Discard,
}

/// Outcome of an inbound end of message.
pub(crate) struct EndAction {
    /// finish the request body channel with success.
    pub(crate) finish_channel: bool,
}

/// Outcome of an inbound reset (half-close, cancellation or stream error).
pub(crate) struct ResetAction {
    /// finish the request body channel with an error.
    pub(crate) finish_channel: bool,
}

/// Failure of a response side operation.
#[derive(Debug)]
pub(crate) enum WriterFailure {
    /// operation not valid in the current state; state untouched.
    State(InvalidWriterState),
    /// protocol contract broken; the exchange cannot continue.
    Fatal(ProtoError),
}

/// The single source of truth for where in the protocol an exchange is:
/// both state machines, the keep-alive flag and the request version the
/// response head mirrors. Mutated under the per connection mutex only; every
/// transition is total and returns a typed error instead of panicking.
pub(crate) struct CoordinatorState {
    request: RequestState,
    response: ResponseState,
    keep_alive: bool,
    version: Version,
    failure: Option<ProtoError>,
}

impl CoordinatorState {
    pub(crate) fn new() -> Self {
        Self {
            request: RequestState::Idle,
            response: ResponseState::Idle,
            keep_alive: true,
            version: Version::HTTP_11,
            failure: None,
        }
    }

    pub(crate) fn request_phase(&self) -> RequestPhase {
        match self.request {
            RequestState::Idle => RequestPhase::Idle,
            RequestState::AwaitingBody => RequestPhase::AwaitingBody,
            RequestState::ReceivingBody => RequestPhase::ReceivingBody,
            RequestState::AwaitingResponseComplete => RequestPhase::AwaitingResponseComplete,
            RequestState::StreamReset => RequestPhase::StreamReset,
        }
    }

    pub(crate) fn response_phase(&self) -> ResponsePhase {
        self.response.phase()
    }

    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.request, RequestState::Idle) && matches!(self.response, ResponseState::Idle)
    }

    pub(crate) fn take_failure(&mut self) -> Option<ProtoError> {
        self.failure.take()
    }

    // ===== inbound transitions =====

    /// Inbound head observed while waiting for a new exchange.
    pub(crate) fn on_head(&mut self, version: Version, keep_alive: bool) -> Result<HeadAction, ProtoError> {
        match self.request {
            RequestState::Idle => match self.response {
                ResponseState::Idle => {
                    self.request = RequestState::AwaitingBody;
                    self.response = ResponseState::PendingHead {
                        draft: ResponseDraft::new(),
                    };
                    self.keep_alive = keep_alive;
                    self.version = version;
                    Ok(HeadAction::Start)
                }
                // request side idle with a response in flight means the
                // previous exchange never converged. Contain it as a typed
                // error rather than corrupting both machines.
                _ => Err(self.unexpected(InboundEvent::Head)),
            },
            RequestState::StreamReset => Ok(HeadAction::Ignore),
            _ => Err(self.unexpected(InboundEvent::Head)),
        }
    }

    /// Inbound head observed mid exchange by the pump.
    pub(crate) fn on_stray_head(&mut self) -> Result<FrameAction, ProtoError> {
        match self.request {
            RequestState::StreamReset => Ok(FrameAction::Discard),
            _ => Err(self.unexpected(InboundEvent::Head)),
        }
    }

    pub(crate) fn on_body(&mut self) -> Result<FrameAction, ProtoError> {
        match self.request {
            RequestState::AwaitingBody => {
                self.request = RequestState::ReceivingBody;
                Ok(FrameAction::Feed)
            }
            RequestState::ReceivingBody => Ok(FrameAction::Feed),
            RequestState::StreamReset => Ok(FrameAction::Discard),
            RequestState::Idle | RequestState::AwaitingResponseComplete => {
                Err(self.unexpected(InboundEvent::BodyChunk))
            }
        }
    }

    pub(crate) fn on_end(&mut self) -> Result<EndAction, ProtoError> {
        match self.request {
            RequestState::AwaitingBody | RequestState::ReceivingBody => {
                // converge with the response side.
                match self.response {
                    ResponseState::AwaitingRequestComplete { .. } => {
                        self.request = RequestState::Idle;
                        self.response = ResponseState::Idle;
                    }
                    ResponseState::AwaitingHandlingComplete { .. } => {
                        self.request = RequestState::Idle;
                    }
                    _ => self.request = RequestState::AwaitingResponseComplete,
                }
                Ok(EndAction { finish_channel: true })
            }
            // duplicate end of message is a no-op.
            RequestState::AwaitingResponseComplete | RequestState::StreamReset => {
                Ok(EndAction { finish_channel: false })
            }
            RequestState::Idle => Err(self.unexpected(InboundEvent::End)),
        }
    }

    /// Inbound stream reset: peer half-close, stream error or cancellation.
    /// Total; downgrades keep-alive so the connection closes once the
    /// response in flight is done.
    pub(crate) fn on_reset(&mut self) -> ResetAction {
        let finish_channel = matches!(
            self.request,
            RequestState::AwaitingBody | RequestState::ReceivingBody
        );
        self.request = RequestState::StreamReset;
        self.keep_alive = false;
        ResetAction { finish_channel }
    }

    // ===== response side transitions =====

    pub(crate) fn writer_state(&self) -> WriterState {
        self.response.writer_state()
    }

    /// Exclusive access to the response draft for head mutation before
    /// commit.
    pub(crate) fn draft_mut(&mut self, attempted: WriterOp) -> Result<&mut ResponseDraft, InvalidWriterState> {
        match self.response {
            ResponseState::PendingHead { ref mut draft } => Ok(draft),
            ref other => Err(InvalidWriterState {
                attempted,
                observed: other.writer_state(),
            }),
        }
    }

    /// Observe the draft before commit or the frozen head after. Valid until
    /// the response reaches its terminal writer state.
    pub(crate) fn inspect_head<R>(
        &self,
        read: impl FnOnce(&HeadView<'_>) -> R,
    ) -> Result<R, InvalidWriterState> {
        match self.response {
            ResponseState::PendingHead { ref draft } => Ok(read(&HeadView {
                status: draft.status,
                content_type: draft.content_type.as_ref(),
                body_length: draft.body_length,
                headers: &draft.headers,
            })),
            ResponseState::PendingBody { ref head, .. } | ResponseState::SendingBody { ref head, .. } => {
                Ok(read(&HeadView {
                    status: head.status,
                    content_type: head.content_type.as_ref(),
                    body_length: head.body_length,
                    headers: &head.headers,
                }))
            }
            ref other => Err(InvalidWriterState {
                attempted: WriterOp::Inspect,
                observed: other.writer_state(),
            }),
        }
    }

    /// Freeze the draft into the effective response head. The returned head
    /// is the one outbound `Head` part of the exchange.
    pub(crate) fn commit(&mut self) -> Result<ResponseHead, InvalidWriterState> {
        match mem::replace(&mut self.response, ResponseState::Idle) {
            ResponseState::PendingHead { draft } => {
                let (out, head, declared) = head::freeze(self.version, draft);
                if head::has_connection_close(&head.headers) {
                    self.keep_alive = false;
                }
                let budget = declared.map(|declared| BodyBudget {
                    declared,
                    remaining: declared,
                });
                self.response = ResponseState::PendingBody { head, budget };
                Ok(out)
            }
            other => {
                let err = InvalidWriterState {
                    attempted: WriterOp::Commit,
                    observed: other.writer_state(),
                };
                self.response = other;
                Err(err)
            }
        }
    }

    /// Account one outbound body chunk of `len` bytes against the committed
    /// head. Overstepping the emitted content-length is fatal and is
    /// recorded so the connection loop closes with the cause.
    pub(crate) fn write_chunk(&mut self, len: u64) -> Result<(), WriterFailure> {
        if let Some(ref e) = self.failure {
            return Err(WriterFailure::Fatal(e.clone()));
        }

        match mem::replace(&mut self.response, ResponseState::Idle) {
            ResponseState::PendingBody { head, budget } | ResponseState::SendingBody { head, budget } => {
                match budget {
                    Some(b) if len > b.remaining => {
                        let err = ProtoError::OverlengthBody {
                            declared: b.declared,
                            offered: b.declared - b.remaining + len,
                        };
                        self.failure = Some(err.clone());
                        self.response = ResponseState::SendingBody { head, budget };
                        Err(WriterFailure::Fatal(err))
                    }
                    Some(b) => {
                        self.response = ResponseState::SendingBody {
                            head,
                            budget: Some(BodyBudget {
                                declared: b.declared,
                                remaining: b.remaining - len,
                            }),
                        };
                        Ok(())
                    }
                    None => {
                        self.response = ResponseState::SendingBody { head, budget: None };
                        Ok(())
                    }
                }
            }
            other => {
                let err = InvalidWriterState {
                    attempted: WriterOp::WriteBodyPart,
                    observed: other.writer_state(),
                };
                self.response = other;
                Err(WriterFailure::State(err))
            }
        }
    }

    /// Terminal transition of the response body. Converges with the request
    /// side; the caller emits the outbound `End` afterwards.
    pub(crate) fn complete(&mut self) -> Result<(), InvalidWriterState> {
        match mem::replace(&mut self.response, ResponseState::Idle) {
            ResponseState::PendingBody { head, .. } | ResponseState::SendingBody { head, .. } => {
                match self.request {
                    RequestState::AwaitingResponseComplete => {
                        self.request = RequestState::Idle;
                        self.response = ResponseState::AwaitingHandlingComplete { head };
                    }
                    // inbound already went away; nothing more to wait for
                    // on that side.
                    RequestState::StreamReset => {
                        self.response = ResponseState::AwaitingHandlingComplete { head };
                    }
                    _ => self.response = ResponseState::AwaitingRequestComplete { head },
                }
                Ok(())
            }
            other => {
                let err = InvalidWriterState {
                    attempted: WriterOp::Complete,
                    observed: other.writer_state(),
                };
                self.response = other;
                Err(err)
            }
        }
    }

    /// The handler future resolved. Confirms the exchange converged and
    /// returns both machines to idle; a response left unfinished is reported
    /// with the phase it was abandoned in.
    pub(crate) fn finish_handling(&mut self) -> Result<(), ProtoError> {
        match self.response {
            ResponseState::Idle => Ok(()),
            ResponseState::AwaitingHandlingComplete { .. } | ResponseState::AwaitingRequestComplete { .. } => {
                self.response = ResponseState::Idle;
                Ok(())
            }
            ref other => Err(ProtoError::ResponseIncomplete { phase: other.phase() }),
        }
    }

    /// Monotonic keep-alive downgrade requested through the response writer.
    /// A no-op between exchanges; rejected once the response reached its
    /// terminal transition.
    pub(crate) fn downgrade_keep_alive(&mut self) -> Result<(), InvalidWriterState> {
        match self.response {
            ResponseState::Idle => Ok(()),
            ResponseState::PendingHead { .. } | ResponseState::PendingBody { .. } | ResponseState::SendingBody { .. } => {
                self.keep_alive = false;
                Ok(())
            }
            ref other => Err(InvalidWriterState {
                attempted: WriterOp::DowngradeKeepAlive,
                observed: other.writer_state(),
            }),
        }
    }

    fn unexpected(&self, event: InboundEvent) -> ProtoError {
        ProtoError::UnexpectedFrame {
            event,
            phase: self.request_phase(),
        }
    }
}

/// Borrowed view over the current response head fields, draft or frozen.
pub(crate) struct HeadView<'a> {
    pub(crate) status: StatusCode,
    pub(crate) content_type: Option<&'a HeaderValue>,
    pub(crate) body_length: BodyLength,
    pub(crate) headers: &'a HeaderMap,
}
