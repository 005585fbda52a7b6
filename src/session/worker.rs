//! The protocol executor (spec §5 "single-writer structure behind a
//! protocol executor", §9).
//!
//! A [`Worker`] owns every piece of state the spec reserves to the
//! protocol executor — lifecycle state, `clientId`, the bound transport,
//! the advice cache, the reconnect timer — and processes exactly one
//! [`Command`] at a time, drawn from two channels via `tokio::select!`,
//! the same two-armed-loop discipline the teacher's `WsServer::run`
//! applies in `connections/ws.rs`: one channel carries commands from the
//! outside world (`Session` handles — user calls and subscribe/unsubscribe
//! requests), the other carries commands the worker posts to itself
//! (transport callbacks, timer fires). The split matters for shutdown:
//! the worker only ever holds the *internal* channel's sender, so the
//! external channel closes (and `run` returns) once every `Session`
//! handle is dropped, instead of the worker keeping its own receiver
//! alive forever (spec §9 "user calls post events, transport callbacks
//! post events, timers post events" — still unified onto one `Command`
//! enum, just not onto one channel).

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{
    advice::{Advice, ReconnectActionKind},
    channel::ChannelRegistry,
    error::{ProtocolError, RequestError, SessionError, TransportIoError, TransportNegotiationError},
    extension::Extensions,
    message::{Message, MetaChannelKind},
    scheduler::{Scheduler, TimerHandle},
    session::{state::SessionState, SessionOptions, SessionSnapshot},
    transport::{Transport, TransportLifecycle, TransportListener, TransportRegistry},
};

/// One unit of work for the protocol executor. Every external event —
/// a user API call, a transport callback, a scheduler fire — arrives as
/// one of these, in the order it occurred (spec §9).
pub(crate) enum Command {
    Handshake,
    Disconnect,
    Publish { channel: String, data: Value },
    Subscribe { channel: String, responder: oneshot::Sender<Result<(), RequestError>> },
    Unsubscribe { channel: String, responder: oneshot::Sender<Result<(), RequestError>> },
    Inbound(Vec<Message>),
    TransportFailure { cause: Box<dyn std::error::Error + Send + Sync>, attempted: Vec<Message> },
    AsyncConnect,
    AsyncHandshake,
    HandshakeTimeout(String),
    MetaTimeout(String),
    DisconnectDeadline,
    BeginBatch,
    EndBatch,
    SetErrorListener(Arc<dyn Fn(SessionError) + Send + Sync>),
}

#[derive(Clone, Copy)]
enum RequestKind {
    Subscribe,
    Unsubscribe,
}

impl RequestKind {
    fn channel_name(self) -> &'static str {
        match self {
            Self::Subscribe => MetaChannelKind::Subscribe.channel(),
            Self::Unsubscribe => MetaChannelKind::Unsubscribe.channel(),
        }
    }
}

/// A subscribe/unsubscribe request awaiting its reply, evicted on reply
/// or timeout (spec §9 "bounded pending-request map, evicted on reply or
/// timeout"). Dropping it cancels its timeout timer.
struct PendingMeta {
    channel: String,
    responder: oneshot::Sender<Result<(), RequestError>>,
    _timer: TimerHandle,
}

/// Forwards transport callbacks into the worker's command queue. Kept
/// cheap to clone/share since the same instance is handed to every
/// transport the session ever binds.
struct SessionTransportListener {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl TransportListener for SessionTransportListener {
    fn on_messages(&self, messages: Vec<Message>) {
        let _ = self.command_tx.send(Command::Inbound(messages));
    }

    fn on_failure(&self, cause: Box<dyn std::error::Error + Send + Sync>, attempted: Vec<Message>) {
        let _ = self.command_tx.send(Command::TransportFailure { cause, attempted });
    }
}

pub(crate) struct Worker {
    options: SessionOptions,
    state: SessionState,
    client_id: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    transport_lifecycle: TransportLifecycle,
    advice: Advice,
    timer: TimerHandle,
    handshake_deadline: TimerHandle,
    disconnect_deadline: TimerHandle,
    id_counter: u64,
    transports: Arc<TransportRegistry>,
    channels: Arc<ChannelRegistry>,
    extensions: Arc<Extensions>,
    scheduler: Arc<dyn Scheduler>,
    /// Sender for commands the worker posts to itself (timer fires,
    /// transport callbacks). Never handed to a `Session` — see the
    /// module doc comment for why that split is what lets the worker
    /// shut down.
    self_tx: mpsc::UnboundedSender<Command>,
    snapshot: Arc<arc_swap::ArcSwap<SessionSnapshot>>,
    error_listener: Option<Arc<dyn Fn(SessionError) + Send + Sync>>,
    pending_meta: HashMap<String, PendingMeta>,
    batch_depth: u32,
    batch_buffer: Vec<Message>,
    listener: Arc<SessionTransportListener>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: SessionOptions,
        transports: Arc<TransportRegistry>,
        channels: Arc<ChannelRegistry>,
        extensions: Arc<Extensions>,
        scheduler: Arc<dyn Scheduler>,
        snapshot: Arc<arc_swap::ArcSwap<SessionSnapshot>>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (self_tx, self_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(SessionTransportListener { command_tx: self_tx.clone() });
        let worker = Self {
            options,
            state: SessionState::Disconnected,
            client_id: None,
            transport: None,
            transport_lifecycle: TransportLifecycle::Uninitialized,
            advice: Advice::default(),
            timer: TimerHandle::none(),
            handshake_deadline: TimerHandle::none(),
            disconnect_deadline: TimerHandle::none(),
            id_counter: 0,
            transports,
            channels,
            extensions,
            scheduler,
            self_tx,
            snapshot,
            error_listener: None,
            pending_meta: HashMap::new(),
            batch_depth: 0,
            batch_buffer: Vec::new(),
            listener,
        };
        (worker, self_rx)
    }

    /// Runs the protocol executor until every external `Session` handle
    /// (and thus every clone of `external_rx`'s sender) is dropped.
    /// `internal_rx` never closes on its own — the worker holds the only
    /// long-lived clone of its sender (`self.self_tx`, also cloned into
    /// `self.listener` and into scheduled timer callbacks) — so only
    /// `external_rx` is watched for shutdown.
    pub(crate) async fn run(
        mut self,
        mut external_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                command = external_rx.recv() => {
                    match command {
                        Some(command) => self.dispatch(command),
                        None => break,
                    }
                }
                Some(command) = internal_rx.recv() => {
                    self.dispatch(command);
                }
            }
        }

        if let Some(transport) = self.transport.take() {
            transport.remove_listener();
            transport.destroy();
        }
        tracing::debug!("session worker shutting down: all session handles dropped");
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Handshake => self.begin_handshake(),
            Command::Disconnect => self.begin_disconnect(),
            Command::Publish { channel, data } => self.handle_publish(channel, data),
            Command::Subscribe { channel, responder } => {
                self.handle_meta_request(channel, RequestKind::Subscribe, responder)
            }
            Command::Unsubscribe { channel, responder } => {
                self.handle_meta_request(channel, RequestKind::Unsubscribe, responder)
            }
            Command::Inbound(messages) => self.process_inbound(messages),
            Command::TransportFailure { cause, attempted } => {
                self.handle_transport_failure(cause, attempted)
            }
            Command::AsyncConnect => self.handle_async_connect(),
            Command::AsyncHandshake => {
                if self.state == SessionState::Disconnected {
                    self.begin_handshake();
                }
            }
            Command::HandshakeTimeout(id) => self.handle_handshake_timeout(id),
            Command::MetaTimeout(id) => self.handle_meta_timeout(id),
            Command::DisconnectDeadline => self.handle_disconnect_deadline(),
            Command::BeginBatch => self.batch_depth += 1,
            Command::EndBatch => self.end_batch(),
            Command::SetErrorListener(listener) => self.error_listener = Some(listener),
        }
    }

    fn next_id(&mut self) -> String {
        self.id_counter += 1;
        self.id_counter.to_string()
    }

    fn publish_snapshot(&self) {
        self.snapshot.store(Arc::new(SessionSnapshot {
            state: self.state,
            client_id: self.client_id.clone(),
            transport_lifecycle: self.transport_lifecycle,
        }));
    }

    fn report_error(&self, err: SessionError) {
        tracing::warn!(error = %err, "session-level error");
        if let Some(listener) = &self.error_listener {
            listener(err);
        }
    }

    fn bind_transport(&mut self, transport: Arc<dyn Transport>) {
        if let Some(old) = self.transport.take() {
            tracing::debug!(transport = old.name(), "destroying previous transport");
            old.remove_listener();
            old.destroy();
            self.transport_lifecycle = TransportLifecycle::Destroyed;
        }
        tracing::debug!(transport = transport.name(), "initializing transport");
        transport.init();
        transport.add_listener(self.listener.clone());
        self.transport = Some(transport);
        self.transport_lifecycle = TransportLifecycle::Initialized;
    }

    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.remove_listener();
            transport.destroy();
            self.transport_lifecycle = TransportLifecycle::Destroyed;
        }
        self.state = SessionState::Disconnected;
        self.client_id = None;
        self.timer = TimerHandle::none();
        self.disconnect_deadline = TimerHandle::none();
        self.handshake_deadline = TimerHandle::none();
        self.batch_depth = 0;
        self.batch_buffer.clear();
        for (_, pending) in self.pending_meta.drain() {
            let _ = pending.responder.send(Err(RequestError {
                channel: pending.channel,
                reason: "session disconnected".to_string(),
            }));
        }
        self.publish_snapshot();
    }

    fn apply_advice(&mut self) {
        let (kind, interval) = self.advice.effective();
        match kind {
            ReconnectActionKind::Retry => {
                let tx = self.self_tx.clone();
                self.timer =
                    self.scheduler.schedule(interval, Box::new(move || { let _ = tx.send(Command::AsyncConnect); }));
            }
            ReconnectActionKind::Handshake => {
                self.state = SessionState::Disconnected;
                self.publish_snapshot();
                let tx = self.self_tx.clone();
                self.timer = self
                    .scheduler
                    .schedule(interval, Box::new(move || { let _ = tx.send(Command::AsyncHandshake); }));
            }
            ReconnectActionKind::None => {
                self.timer = TimerHandle::none();
            }
        }
    }

    fn begin_handshake(&mut self) {
        let transport = match self.transport.clone().or_else(|| self.transports.first_supporting(&self.options.version)) {
            Some(transport) => transport,
            None => {
                self.state = SessionState::Disconnected;
                self.publish_snapshot();
                self.report_error(SessionError::TransportNegotiation(TransportNegotiationError {
                    offered: Vec::new(),
                    registered: self.transports.names(),
                }));
                return;
            }
        };

        if self.transport.as_ref().map(|bound| !Arc::ptr_eq(bound, &transport)).unwrap_or(true) {
            self.bind_transport(transport.clone());
        }

        self.client_id = None;
        self.state = SessionState::Handshaking;
        self.publish_snapshot();

        let id = self.next_id();
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String(MetaChannelKind::Handshake.channel().to_string())).unwrap();
        msg.set(Message::FIELD_VERSION, Value::String(self.options.version.clone())).unwrap();
        msg.set(
            Message::FIELD_SUPPORTED_CONNECTION_TYPES,
            Value::Array(self.transports.names().into_iter().map(Value::String).collect()),
        )
        .unwrap();
        msg.set(Message::FIELD_ID, Value::String(id.clone())).unwrap();

        match self.extensions.run_outgoing(true, msg) {
            Some(msg) => {
                msg.freeze(msg.get_json()).ok();
                transport.send(vec![msg]);
            }
            None => tracing::debug!("handshake request vetoed by extension pipeline"),
        }

        let tx = self.self_tx.clone();
        self.handshake_deadline = self
            .scheduler
            .schedule(self.options.handshake_timeout, Box::new(move || { let _ = tx.send(Command::HandshakeTimeout(id)); }));
    }

    fn begin_disconnect(&mut self) {
        self.timer = TimerHandle::none();
        self.state = SessionState::Disconnecting;
        self.publish_snapshot();

        if let Some(transport) = self.transport.clone() {
            let id = self.next_id();
            let msg = Message::new();
            msg.set(Message::FIELD_CHANNEL, Value::String(MetaChannelKind::Disconnect.channel().to_string())).unwrap();
            if let Some(client_id) = &self.client_id {
                msg.set(Message::FIELD_CLIENT_ID, Value::String(client_id.clone())).unwrap();
            }
            msg.set(Message::FIELD_ID, Value::String(id)).unwrap();

            if let Some(msg) = self.extensions.run_outgoing(true, msg) {
                msg.freeze(msg.get_json()).ok();
                transport.send(vec![msg]);
            }
        }

        let tx = self.self_tx.clone();
        self.disconnect_deadline = self
            .scheduler
            .schedule(self.options.disconnect_timeout, Box::new(move || { let _ = tx.send(Command::DisconnectDeadline); }));
    }

    fn handle_disconnect_deadline(&mut self) {
        if self.state == SessionState::Disconnecting {
            tracing::warn!("disconnect reply not received within deadline, forcing teardown");
            self.teardown();
        }
    }

    fn handle_async_connect(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        let (Some(transport), Some(client_id)) = (self.transport.clone(), self.client_id.clone()) else {
            return;
        };

        let id = self.next_id();
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String(MetaChannelKind::Connect.channel().to_string())).unwrap();
        msg.set(Message::FIELD_CLIENT_ID, Value::String(client_id)).unwrap();
        msg.set(Message::FIELD_CONNECTION_TYPE, Value::String(transport.name().to_string())).unwrap();
        msg.set(Message::FIELD_ID, Value::String(id)).unwrap();

        if let Some(msg) = self.extensions.run_outgoing(true, msg) {
            msg.freeze(msg.get_json()).ok();
            transport.send(vec![msg]);
        }
    }

    fn handle_publish(&mut self, channel: String, data: Value) {
        let id = self.next_id();
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String(channel)).unwrap();
        msg.set(Message::FIELD_DATA, data).unwrap();
        msg.set(Message::FIELD_ID, Value::String(id)).unwrap();

        let Some(msg) = self.extensions.run_outgoing(false, msg) else { return };
        msg.freeze(msg.get_json()).ok();

        if self.batch_depth > 0 {
            self.batch_buffer.push(msg);
            return;
        }

        match &self.transport {
            Some(transport) => transport.send(vec![msg]),
            None => tracing::warn!("publish dropped: no transport bound"),
        }
    }

    fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 && !self.batch_buffer.is_empty() {
            let batch = std::mem::take(&mut self.batch_buffer);
            match &self.transport {
                Some(transport) => transport.send(batch),
                None => tracing::warn!(count = batch.len(), "batched publishes dropped: no transport bound"),
            }
        }
    }

    fn handle_meta_request(
        &mut self,
        channel: String,
        kind: RequestKind,
        responder: oneshot::Sender<Result<(), RequestError>>,
    ) {
        let (Some(client_id), Some(transport)) = (self.client_id.clone(), self.transport.clone()) else {
            let _ = responder.send(Err(RequestError { channel, reason: "session is not connected".to_string() }));
            return;
        };

        let id = self.next_id();
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String(kind.channel_name().to_string())).unwrap();
        msg.set(Message::FIELD_CLIENT_ID, Value::String(client_id)).unwrap();
        msg.set(Message::FIELD_SUBSCRIPTION, Value::String(channel.clone())).unwrap();
        msg.set(Message::FIELD_ID, Value::String(id.clone())).unwrap();

        let msg = match self.extensions.run_outgoing(true, msg) {
            Some(msg) => msg,
            None => {
                let _ =
                    responder.send(Err(RequestError { channel, reason: "vetoed by extension pipeline".to_string() }));
                return;
            }
        };
        msg.freeze(msg.get_json()).ok();
        transport.send(vec![msg]);

        let tx = self.self_tx.clone();
        let timeout_id = id.clone();
        let timer = self
            .scheduler
            .schedule(self.options.meta_request_timeout, Box::new(move || { let _ = tx.send(Command::MetaTimeout(timeout_id)); }));
        self.pending_meta.insert(id, PendingMeta { channel, responder, _timer: timer });
    }

    fn handle_meta_timeout(&mut self, id: String) {
        if let Some(pending) = self.pending_meta.remove(&id) {
            let _ = pending.responder.send(Err(RequestError {
                channel: pending.channel,
                reason: "request timed out waiting for server reply".to_string(),
            }));
        }
    }

    fn handle_handshake_timeout(&mut self, id: String) {
        if self.state != SessionState::Handshaking {
            return;
        }
        let synth = Message::new();
        synth.set(Message::FIELD_CHANNEL, Value::String(MetaChannelKind::Handshake.channel().to_string())).ok();
        synth.set(Message::FIELD_SUCCESSFUL, Value::Bool(false)).ok();
        synth.set(Message::FIELD_ID, Value::String(id)).ok();
        self.process_inbound(vec![synth]);
    }

    fn handle_transport_failure(&mut self, cause: Box<dyn std::error::Error + Send + Sync>, attempted: Vec<Message>) {
        self.report_error(SessionError::TransportIo(TransportIoError::new(cause)));

        let channel = match self.state {
            SessionState::Handshaking => MetaChannelKind::Handshake.channel(),
            SessionState::Connected => MetaChannelKind::Connect.channel(),
            SessionState::Disconnecting => MetaChannelKind::Disconnect.channel(),
            SessionState::Disconnected => return,
        };

        let synth = Message::new();
        synth.set(Message::FIELD_CHANNEL, Value::String(channel.to_string())).ok();
        synth.set(Message::FIELD_SUCCESSFUL, Value::Bool(false)).ok();
        if let Some(id) = attempted.first().and_then(Message::id) {
            synth.set(Message::FIELD_ID, Value::String(id)).ok();
        }
        self.process_inbound(vec![synth]);
    }

    /// The shared inbound path (spec §4.7): real wire messages, a
    /// synthesized handshake timeout, and a synthesized transport-failure
    /// reply all flow through here identically (spec §5 "allowing uniform
    /// handling").
    fn process_inbound(&mut self, messages: Vec<Message>) {
        for message in messages {
            let is_meta = message.channel().as_deref().map(|c| c.starts_with("/meta/")).unwrap_or(false);

            let message = match self.extensions.run_incoming(is_meta, message) {
                Some(message) => message,
                None => continue,
            };

            if is_meta {
                self.handle_meta_message(&message);
                if let Some(channel) = message.channel() {
                    if let Ok(Some(chan)) = self.channels.get(&channel, false) {
                        crate::dispatch::notify(&chan, &message);
                    }
                }
                continue;
            }

            match message.channel() {
                Some(name) => match self.channels.matching(&name) {
                    Ok(channels) => crate::dispatch::notify_matching(&channels, &message),
                    Err(err) => self.report_error(SessionError::Protocol(ProtocolError::InvalidChannel(err))),
                },
                None => self.report_error(SessionError::Protocol(ProtocolError::MissingChannel)),
            }
        }
    }

    fn handle_meta_message(&mut self, message: &Message) {
        if let Some(advice) = message.advice() {
            self.advice = self.advice.merged_with(&advice);
        }

        match message.meta_kind() {
            Some(MetaChannelKind::Handshake) => self.handle_handshake_reply(message),
            Some(MetaChannelKind::Connect) => self.handle_connect_reply(message),
            Some(MetaChannelKind::Disconnect) => self.handle_disconnect_reply(message),
            Some(MetaChannelKind::Subscribe) | Some(MetaChannelKind::Unsubscribe) => {
                self.handle_subscribe_or_unsubscribe_reply(message)
            }
            None => {}
        }
    }

    fn handle_handshake_reply(&mut self, message: &Message) {
        self.handshake_deadline = TimerHandle::none();

        if self.state != SessionState::Handshaking {
            self.report_error(SessionError::Protocol(ProtocolError::UnexpectedReply {
                channel: message.channel().unwrap_or_default(),
                state: self.state.as_str(),
            }));
            return;
        }

        if message.successful() != Some(true) {
            self.client_id = None;
            self.state = SessionState::Disconnected;
            self.publish_snapshot();
            tracing::warn!("handshake rejected by server");
            self.apply_advice();
            return;
        }

        self.client_id = message.client_id();

        if let Some(offered) = message.get(Message::FIELD_SUPPORTED_CONNECTION_TYPES).and_then(|v| v.as_array().cloned()) {
            let offered: Vec<String> = offered.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
            match self.transports.negotiate(&self.options.version, &offered) {
                Some(transport) => {
                    let needs_swap =
                        self.transport.as_ref().map(|bound| !Arc::ptr_eq(bound, &transport)).unwrap_or(true);
                    if needs_swap {
                        self.bind_transport(transport);
                    }
                }
                None => {
                    self.report_error(SessionError::TransportNegotiation(TransportNegotiationError {
                        offered,
                        registered: self.transports.names(),
                    }));
                    self.client_id = None;
                    self.state = SessionState::Disconnected;
                    self.publish_snapshot();
                    return;
                }
            }
        }

        self.state = SessionState::Connected;
        self.publish_snapshot();
        self.apply_advice();
    }

    fn handle_connect_reply(&mut self, message: &Message) {
        if !matches!(self.state, SessionState::Connected | SessionState::Disconnecting) {
            self.report_error(SessionError::InvalidState(crate::error::InvalidStateError {
                action: "process connect reply",
                state: self.state.as_str(),
            }));
            return;
        }
        if self.state == SessionState::Disconnecting {
            return;
        }
        if message.successful() != Some(true) {
            tracing::warn!("connect request unsuccessful");
        }
        self.apply_advice();
    }

    fn handle_disconnect_reply(&mut self, _message: &Message) {
        self.teardown();
    }

    fn handle_subscribe_or_unsubscribe_reply(&mut self, message: &Message) {
        let id = message.id().unwrap_or_default();
        let Some(pending) = self.pending_meta.remove(&id) else {
            self.report_error(SessionError::Protocol(ProtocolError::UnknownReplyId { id }));
            return;
        };

        let result = if message.successful() == Some(true) {
            Ok(())
        } else {
            let reason = message
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_else(|| "request rejected by server".to_string());
            Err(RequestError { channel: pending.channel.clone(), reason })
        };
        let _ = pending.responder.send(result);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::TransportRegistry;

    struct CountingTransport {
        destroy_count: Arc<AtomicUsize>,
    }

    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        fn supports_version(&self, _version: &str) -> bool {
            true
        }

        fn init(&self) {}

        fn destroy(&self) {
            self.destroy_count.fetch_add(1, Ordering::SeqCst);
        }

        fn send(&self, _messages: Vec<Message>) {}

        fn add_listener(&self, _listener: Arc<dyn TransportListener>) {}

        fn remove_listener(&self) {}
    }

    /// Regression test: the worker must not retain a sender clone for its
    /// own external channel. Dropping every `Session`-facing sender must
    /// end `run` and tear down whatever transport was bound, rather than
    /// looping forever (see the module doc comment).
    #[tokio::test]
    async fn dropping_external_senders_ends_run_and_destroys_bound_transport() {
        let destroy_count = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(CountingTransport { destroy_count: destroy_count.clone() });
        let mut transports = TransportRegistry::new();
        transports.register(transport);

        let snapshot = Arc::new(arc_swap::ArcSwap::from_pointee(SessionSnapshot::default()));
        let (worker, internal_rx) = Worker::new(
            SessionOptions::default(),
            Arc::new(transports),
            Arc::new(ChannelRegistry::new()),
            Arc::new(Extensions::new()),
            Arc::new(crate::scheduler::TokioScheduler),
            snapshot.clone(),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let _ = command_tx.send(Command::Handshake);
        let handle = tokio::spawn(worker.run(command_rx, internal_rx));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(snapshot.load().transport_lifecycle, TransportLifecycle::Initialized);

        drop(command_tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("worker did not shut down after its last session handle was dropped")
            .unwrap();

        assert_eq!(destroy_count.load(Ordering::SeqCst), 1);
    }
}
