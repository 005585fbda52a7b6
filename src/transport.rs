//! The transport contract and registry (spec §3 "Transport", §4.3, §6).
//!
//! Concrete transport I/O (HTTP long-polling, WebSocket) is out of scope for
//! this crate (spec §1): only the contract a real transport must satisfy,
//! and the bookkeeping needed to negotiate and swap between registered
//! transports, live here. This mirrors the teacher's own `Connection` trait
//! in `lib.rs`, which likewise only describes the shape a transport must
//! have — the concrete I/O lives in separate, feature-gated modules.

use std::sync::Arc;

use crate::message::Message;

/// Callback contract a transport invokes on its bound session (spec §6).
pub trait TransportListener: Send + Sync {
    /// One or more messages were received from the remote broker.
    fn on_messages(&self, messages: Vec<Message>);

    /// The transport failed to deliver `attempted` due to `cause`.
    fn on_failure(&self, cause: Box<dyn std::error::Error + Send + Sync>, attempted: Vec<Message>);
}

/// The lifecycle state of a registered [`Transport`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLifecycle {
    Uninitialized,
    Initialized,
    Destroyed,
}

/// The contract a concrete transport implementation must fulfill (spec §6).
///
/// A `Transport` owns its own listener set (here: a single bound listener,
/// since only one session ever binds a given transport instance — spec §3
/// "Ownership") and a lifecycle flag.
pub trait Transport: Send + Sync {
    /// The transport's registered name, e.g. `"long-polling"`, `"websocket"`.
    fn name(&self) -> &str;

    /// Whether this transport supports the given Bayeux protocol version.
    fn supports_version(&self, version: &str) -> bool;

    /// Prepares the transport for use. Called exactly once per bind.
    fn init(&self);

    /// Releases any resources held by the transport. Called exactly once
    /// per unbind, before a replacement transport is initialized (spec §3).
    fn destroy(&self);

    /// Sends a batch of outbound messages.
    fn send(&self, messages: Vec<Message>);

    /// Registers the listener that receives inbound messages and failures.
    /// A transport is bound to at most one listener at a time.
    fn add_listener(&self, listener: Arc<dyn TransportListener>);

    /// Removes the previously registered listener, if any.
    fn remove_listener(&self);

    /// Creates a new, empty mutable [`Message`] suitable for this transport.
    fn new_message(&self) -> Message {
        Message::new()
    }
}

/// Holds registered transports by name and negotiates between them
/// (spec §4.3).
pub struct TransportRegistry {
    /// Registration order is preserved — it is the client's preference list
    /// and the negotiation tie-break (spec §4.3).
    transports: Vec<Arc<dyn Transport>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self { transports: Vec::new() }
    }

    /// Registers `transport`. Re-registering a name already present replaces
    /// it at its original position in preference order.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        if let Some(existing) = self.transports.iter_mut().find(|t| t.name() == transport.name()) {
            *existing = transport;
        } else {
            self.transports.push(transport);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.name() == name).cloned()
    }

    /// Returns the first registered transport (in registration/preference
    /// order) whose name appears in `offered` and which supports `version`,
    /// or `None` if there is no such transport (spec §4.3).
    pub fn negotiate(&self, version: &str, offered: &[String]) -> Option<Arc<dyn Transport>> {
        self.transports
            .iter()
            .find(|t| offered.iter().any(|name| name == t.name()) && t.supports_version(version))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.transports.iter().map(|t| t.name().to_string()).collect()
    }

    /// The most-preferred registered transport supporting `version`, used to
    /// bootstrap the very first handshake, before any server-offered list is
    /// known (spec §4.3).
    pub fn first_supporting(&self, version: &str) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.supports_version(version)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    struct StubTransport {
        name: &'static str,
        version: &'static str,
        init_count: AtomicUsize,
        destroy_count: AtomicUsize,
        sent: Mutex<Vec<Message>>,
    }

    impl StubTransport {
        fn new(name: &'static str, version: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                version,
                init_count: AtomicUsize::new(0),
                destroy_count: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for StubTransport {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_version(&self, version: &str) -> bool {
            version == self.version
        }

        fn init(&self) {
            self.init_count.fetch_add(1, Ordering::SeqCst);
        }

        fn destroy(&self) {
            self.destroy_count.fetch_add(1, Ordering::SeqCst);
        }

        fn send(&self, messages: Vec<Message>) {
            self.sent.lock().unwrap().extend(messages);
        }

        fn add_listener(&self, _listener: Arc<dyn TransportListener>) {}

        fn remove_listener(&self) {}
    }

    #[test]
    fn negotiate_prefers_registration_order() {
        let mut registry = TransportRegistry::new();
        registry.register(StubTransport::new("t1", "1.0"));
        registry.register(StubTransport::new("t2", "1.0"));

        let offered = vec!["t2".to_string(), "t1".to_string()];
        let negotiated = registry.negotiate("1.0", &offered).unwrap();
        assert_eq!(negotiated.name(), "t1");
    }

    #[test]
    fn negotiate_requires_version_support() {
        let mut registry = TransportRegistry::new();
        registry.register(StubTransport::new("t1", "0.9"));

        assert!(registry.negotiate("1.0", &["t1".to_string()]).is_none());
    }

    #[test]
    fn negotiate_none_when_no_overlap() {
        let mut registry = TransportRegistry::new();
        registry.register(StubTransport::new("t1", "1.0"));

        assert!(registry.negotiate("1.0", &["t2".to_string()]).is_none());
    }
}
