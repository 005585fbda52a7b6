//! Error kinds surfaced by the session engine (spec §7).
//!
//! Follows the teacher's idiom of hand-written `Display`/`Error` impls
//! over small enums rather than a derive-macro error crate.

use std::{error, fmt};

use crate::channel::ChannelIdError;

/// An API call was made while the session was in a state that does not
/// permit it (e.g. `handshake()` while already `CONNECTED`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStateError {
    pub(crate) action: &'static str,
    pub(crate) state: &'static str,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} while session is {}", self.action, self.state)
    }
}

impl error::Error for InvalidStateError {}

/// No transport registered locally is also offered by the server (or vice
/// versa); handshake cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportNegotiationError {
    pub(crate) offered: Vec<String>,
    pub(crate) registered: Vec<String>,
}

impl fmt::Display for TransportNegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no transport in common between registered {:?} and server-offered {:?}",
            self.registered, self.offered
        )
    }
}

impl error::Error for TransportNegotiationError {}

/// A concrete [`Transport`](crate::transport::Transport) reported an I/O
/// failure. Synthesized into an unsuccessful meta-response on the
/// in-flight meta-channel (spec §5, §7).
#[derive(Debug)]
pub struct TransportIoError {
    pub(crate) cause: Box<dyn error::Error + Send + Sync>,
}

impl TransportIoError {
    pub fn new(cause: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self { cause: cause.into() }
    }
}

impl fmt::Display for TransportIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport I/O failure: {}", self.cause)
    }
}

impl error::Error for TransportIoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// A malformed or unexpected message: missing `channel`, a reply for an
/// unknown request id, or a reply while the session was in the wrong
/// state to receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    MissingChannel,
    InvalidChannel(ChannelIdError),
    UnknownReplyId { id: String },
    UnexpectedReply { channel: String, state: &'static str },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChannel => write!(f, "message is missing a `channel` field"),
            Self::InvalidChannel(err) => write!(f, "invalid channel: {err}"),
            Self::UnknownReplyId { id } => write!(f, "reply for unknown request id `{id}`"),
            Self::UnexpectedReply { channel, state } => {
                write!(f, "unexpected reply on `{channel}` while session is {state}")
            }
        }
    }
}

impl error::Error for ProtocolError {}

/// A client-initiated `/meta/subscribe` or `/meta/unsubscribe` request was
/// rejected by the server, or timed out waiting for a reply (spec §4.6:
/// "the subscribe call's completion callback is notified with the server
/// error").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub channel: String,
    pub reason: String,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request on `{}` failed: {}", self.channel, self.reason)
    }
}

impl error::Error for RequestError {}

/// Any error a session-level operation can fail with. `ExtensionError`
/// and `ListenerError` (spec §7) are intentionally absent: both are
/// isolated at the point they occur (§4.4, §4.7) and never propagate
/// out of the engine as a return value, only as a log line.
#[derive(Debug)]
pub enum SessionError {
    InvalidState(InvalidStateError),
    TransportNegotiation(TransportNegotiationError),
    TransportIo(TransportIoError),
    Protocol(ProtocolError),
    Request(RequestError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(err) => err.fmt(f),
            Self::TransportNegotiation(err) => err.fmt(f),
            Self::TransportIo(err) => err.fmt(f),
            Self::Protocol(err) => err.fmt(f),
            Self::Request(err) => err.fmt(f),
        }
    }
}

impl error::Error for SessionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::InvalidState(err) => Some(err),
            Self::TransportNegotiation(err) => Some(err),
            Self::TransportIo(err) => Some(err),
            Self::Protocol(err) => Some(err),
            Self::Request(err) => Some(err),
        }
    }
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        Self::Request(err)
    }
}

impl From<InvalidStateError> for SessionError {
    fn from(err: InvalidStateError) -> Self {
        Self::InvalidState(err)
    }
}

impl From<TransportNegotiationError> for SessionError {
    fn from(err: TransportNegotiationError) -> Self {
        Self::TransportNegotiation(err)
    }
}

impl From<TransportIoError> for SessionError {
    fn from(err: TransportIoError) -> Self {
        Self::TransportIo(err)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}
