//! A Bayeux protocol client session engine: handshake, transport
//! negotiation, an extension pipeline, channel dispatch and
//! reconnection advice.
//!
//! Concrete transport I/O (HTTP long-polling, WebSocket), the JSON
//! codec beyond message framing, the logging sink, and the
//! scheduler/clock primitive are collaborators referenced only by
//! interface — see [`transport::Transport`] and [`scheduler::Scheduler`].

pub mod advice;
pub mod channel;
pub(crate) mod dispatch;
pub mod error;
pub mod extension;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod subscription;
pub mod transport;

pub use crate::{
    advice::{Advice, ReconnectAction, ReconnectActionKind},
    channel::{Channel, ChannelId, ChannelIdError, ChannelRegistry, ListenerHandle, MessageListener},
    error::{
        InvalidStateError, ProtocolError, RequestError, SessionError, TransportIoError,
        TransportNegotiationError,
    },
    extension::{Extension, ExtensionError, Extensions},
    message::{Message, MetaChannelKind},
    scheduler::{Scheduler, TimerHandle, TokioScheduler},
    session::{Session, SessionOptions, SessionSnapshot, SessionState},
    subscription::{ChannelStream, SessionChannel},
    transport::{Transport, TransportListener, TransportLifecycle, TransportRegistry},
};
