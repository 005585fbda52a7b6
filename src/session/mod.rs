//! The session handle: the public, cloneable front door to the protocol
//! executor (spec §4.5, §5, §6 "Public API surface").

pub(crate) mod state;
pub(crate) mod worker;

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::mpsc;

pub use state::SessionState;

use crate::{
    channel::{Channel, ChannelIdError, ChannelRegistry},
    error::{InvalidStateError, SessionError},
    extension::{Extension, Extensions},
    message::MetaChannelKind,
    scheduler::{Scheduler, TokioScheduler},
    subscription::SessionChannel,
    transport::{TransportLifecycle, TransportRegistry},
};
use worker::{Command, Worker};

/// Tunable session behavior (spec §5 "configurable bound", A.3). Built
/// with [`SessionOptions::new`] then adjusted with the `with_*` builder
/// methods, the same posture the teacher's `Provider<C>` takes its
/// options through constructor parameters rather than a config file.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The Bayeux protocol version this client negotiates (spec §6: `"1.0"`).
    pub version: String,
    /// How long `disconnect()` waits for the disconnect reply before
    /// forcing teardown (spec §5, default 5s).
    pub disconnect_timeout: Duration,
    /// How long a handshake request waits for a reply before the session
    /// synthesizes an unsuccessful one (spec §8 scenario 5).
    pub handshake_timeout: Duration,
    /// How long a subscribe/unsubscribe request waits for a reply before
    /// it is resolved as a timeout (spec §9 "bounded pending-request map,
    /// evicted on reply or timeout").
    pub meta_request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            disconnect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            meta_request_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_meta_request_timeout(mut self, timeout: Duration) -> Self {
        self.meta_request_timeout = timeout;
        self
    }
}

/// A snapshot of session-level attributes, published by the protocol
/// executor and readable without synchronizing with it (spec §5 "read
/// concurrently via atomic/volatile publication").
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub client_id: Option<String>,
    /// The bound transport's lifecycle flag (spec §3 "Holds its own
    /// listener set and a lifecycle flag").
    pub transport_lifecycle: TransportLifecycle,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            client_id: None,
            transport_lifecycle: TransportLifecycle::Uninitialized,
        }
    }
}

/// The Bayeux client session. Cheap to clone: every clone shares the
/// same protocol executor, channel registry, transport registry and
/// extension pipeline (spec §3 "Ownership").
#[derive(Clone)]
pub struct Session {
    command_tx: mpsc::UnboundedSender<Command>,
    channels: Arc<ChannelRegistry>,
    transports: Arc<TransportRegistry>,
    extensions: Arc<Extensions>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl Session {
    /// Creates a session over `transports`, running its protocol
    /// executor on the current Tokio runtime with the default
    /// [`TokioScheduler`].
    pub fn new(transports: TransportRegistry, options: SessionOptions) -> Self {
        Self::with_scheduler(transports, options, Arc::new(TokioScheduler))
    }

    /// Like [`Session::new`], but with a caller-supplied [`Scheduler`] —
    /// primarily for tests that want deterministic or accelerated timers.
    pub fn with_scheduler(
        transports: TransportRegistry,
        options: SessionOptions,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let transports = Arc::new(transports);
        let channels = Arc::new(ChannelRegistry::new());
        let extensions = Arc::new(Extensions::new());
        let snapshot = Arc::new(ArcSwap::from_pointee(SessionSnapshot::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let (worker, internal_rx) = Worker::new(
            options,
            transports.clone(),
            channels.clone(),
            extensions.clone(),
            scheduler,
            snapshot.clone(),
        );
        tokio::spawn(worker.run(command_rx, internal_rx));

        Self { command_tx, channels, transports, extensions, snapshot }
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.snapshot.load().state
    }

    /// The server-assigned client id, if the session is currently
    /// connected (or tearing down a connected session).
    pub fn client_id(&self) -> Option<String> {
        self.snapshot.load().client_id.clone()
    }

    /// The bound transport's current lifecycle flag.
    pub fn transport_lifecycle(&self) -> TransportLifecycle {
        self.snapshot.load().transport_lifecycle
    }

    /// The names of every registered transport, in preference order.
    pub fn registered_transports(&self) -> Vec<String> {
        self.transports.names()
    }

    /// Begins a handshake. Synchronously rejected with
    /// [`InvalidStateError`] if the session is not `DISCONNECTED` (spec
    /// §4.5 "Invalid triggers").
    pub fn handshake(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Disconnected {
            return Err(SessionError::InvalidState(InvalidStateError {
                action: "handshake",
                state: self.state().as_str(),
            }));
        }
        let _ = self.command_tx.send(Command::Handshake);
        Ok(())
    }

    /// Begins a graceful disconnect. Synchronously rejected with
    /// [`InvalidStateError`] if the session is not `CONNECTED`.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Connected {
            return Err(SessionError::InvalidState(InvalidStateError {
                action: "disconnect",
                state: self.state().as_str(),
            }));
        }
        let _ = self.command_tx.send(Command::Disconnect);
        Ok(())
    }

    /// Publishes `data` on `channel`. Fire-and-forget: enqueued on the
    /// protocol executor and returns immediately (spec §5). The wire
    /// message never carries a `clientId` (spec §4.1 leakage property).
    pub fn publish(&self, channel: impl Into<String>, data: Value) {
        let _ = self.command_tx.send(Command::Publish { channel: channel.into(), data });
    }

    /// Returns the handle for the named application channel, creating it
    /// if it does not already exist.
    pub fn channel(&self, name: &str) -> Result<SessionChannel, ChannelIdError> {
        let channel: Arc<Channel> = self.channels.get(name, true)?.expect("create_if_missing is true");
        Ok(SessionChannel::new(channel, self.command_tx.clone()))
    }

    /// Returns the handle for one of the five reserved meta-channels.
    /// Its subscribers receive the raw reply message (spec §3
    /// "MetaChannel").
    pub fn meta_channel(&self, kind: MetaChannelKind) -> SessionChannel {
        let channel = self
            .channels
            .get(kind.channel(), true)
            .expect("meta-channel names are always valid")
            .expect("create_if_missing is true");
        SessionChannel::new(channel, self.command_tx.clone())
    }

    /// Registers an extension at the end of the outgoing/incoming chains
    /// (spec §4.4). Lock-free: takes effect for the next message run
    /// through the pipeline, not for one already in flight.
    pub fn add_extension(&self, extension: Arc<dyn Extension>) {
        self.extensions.add(extension);
    }

    /// Removes a previously registered extension, by identity.
    pub fn remove_extension(&self, extension: &Arc<dyn Extension>) {
        self.extensions.remove(extension);
    }

    /// Registers a session-level error listener, notified of
    /// [`SessionError::Protocol`] occurrences (spec §7; see
    /// `SPEC_FULL.md` §C for why this hook exists as a first-class API).
    pub fn add_error_listener(&self, listener: Arc<dyn Fn(SessionError) + Send + Sync>) {
        let _ = self.command_tx.send(Command::SetErrorListener(listener));
    }

    /// Runs `work`, coalescing every [`Session::publish`] call it makes
    /// into a single transport flush issued once `work` returns (spec
    /// §6 "batch(work)", §9 open question (a): the coalescing boundary
    /// this crate picked is exactly one `batch()` call).
    pub fn batch(&self, work: impl FnOnce(&Session)) {
        let _ = self.command_tx.send(Command::BeginBatch);
        work(self);
        let _ = self.command_tx.send(Command::EndBatch);
    }
}
