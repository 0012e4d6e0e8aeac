use std::fmt;

/// Inbound framing event kinds, used to report rejected transitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InboundEvent {
    Head,
    BodyChunk,
    End,
    Reset,
}

/// Observable phases of the request half of an exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestPhase {
    Idle,
    AwaitingBody,
    ReceivingBody,
    AwaitingResponseComplete,
    StreamReset,
}

/// Observable phases of the response half of an exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponsePhase {
    Idle,
    PendingHead,
    PendingBody,
    SendingBody,
    AwaitingRequestComplete,
    AwaitingHandlingComplete,
}

/// Protocol level failure of an exchange. All variants are fatal for the
/// connection: the coordinator stops the exchange, finishes the request body
/// channel with an error and closes after logging.
#[derive(Clone, Debug)]
pub enum ProtoError {
    /// an inbound framing event arrived that the exchange state does not
    /// permit. Peer misbehavior or a codec bug.
    UnexpectedFrame {
        event: InboundEvent,
        phase: RequestPhase,
    },
    /// a response body offered more bytes than its declared length.
    OverlengthBody { declared: u64, offered: u64 },
    /// the handler returned without bringing its response to completion.
    ResponseIncomplete { phase: ResponsePhase },
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnexpectedFrame { event, phase } => {
                write!(f, "unexpected inbound {event:?} while request side is {phase:?}")
            }
            Self::OverlengthBody { declared, offered } => {
                write!(f, "response body declared {declared} bytes but offered {offered}")
            }
            Self::ResponseIncomplete { phase } => {
                write!(f, "handler finished while response side is still {phase:?}")
            }
        }
    }
}

impl std::error::Error for ProtoError {}

/// Operations available on a response writer, used to report misuse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterOp {
    SetStatus,
    SetContentType,
    SetBodyLength,
    SetHeaders,
    Inspect,
    Commit,
    WriteBodyPart,
    Complete,
    DowngradeKeepAlive,
}

/// Observable states of a response writer. They collapse the response phases:
/// `NotCommitted` maps to `PendingHead`, `Committed` to `PendingBody` and
/// `SendingBody`, `Completed` to everything after the terminal `End`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterState {
    NotCommitted,
    Committed,
    Completed,
}

/// A writer operation was attempted in a state that does not allow it.
/// The coordinator state is left untouched and nothing is emitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InvalidWriterState {
    pub attempted: WriterOp,
    pub observed: WriterState,
}

impl fmt::Display for InvalidWriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} attempted while response writer is {:?}", self.attempted, self.observed)
    }
}

impl std::error::Error for InvalidWriterState {}
