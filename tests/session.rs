//! End-to-end exercise of the session state machine against an in-memory
//! test-double transport, in the spirit of the teacher's
//! `connection/noop.rs` (a minimal `Connection` used so higher-level
//! code can be tested without real I/O). Covers the scenarios named in
//! spec.md §8.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::{json, Value};

use bayeux_session::{
    Extension, ExtensionError, Message, MetaChannelKind, Session, SessionOptions, SessionState,
    Transport, TransportListener, TransportRegistry,
};

struct MockTransport {
    name: &'static str,
    version: &'static str,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    sent: Mutex<Vec<Message>>,
    init_count: AtomicUsize,
    destroy_count: AtomicUsize,
}

impl MockTransport {
    fn new(name: &'static str, version: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            version,
            listener: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            init_count: AtomicUsize::new(0),
            destroy_count: AtomicUsize::new(0),
        })
    }

    fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    fn deliver(&self, messages: Vec<Message>) {
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener.on_messages(messages);
        }
    }
}

impl Transport for MockTransport {
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
        // Auto-acknowledge subscribe/unsubscribe requests, standing in for
        // the broker's half of the round trip.
        for message in &messages {
            if matches!(message.meta_kind(), Some(MetaChannelKind::Subscribe) | Some(MetaChannelKind::Unsubscribe)) {
                let reply = Message::from_json(
                    &json!({
                        "channel": message.channel().unwrap(),
                        "successful": true,
                        "id": message.id(),
                        "subscription": message.subscription(),
                    })
                    .to_string(),
                )
                .unwrap();
                self.deliver(vec![reply]);
            }
        }
        self.sent.lock().unwrap().extend(messages);
    }

    fn add_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn remove_listener(&self) {
        *self.listener.lock().unwrap() = None;
    }
}

fn handshake_reply(client_id: &str, supported: &[&str], advice: Option<Value>) -> Message {
    let mut body = json!({
        "channel": "/meta/handshake",
        "successful": true,
        "clientId": client_id,
        "supportedConnectionTypes": supported,
        "id": "1",
    });
    if let Some(advice) = advice {
        body.as_object_mut().unwrap().insert("advice".to_string(), advice);
    }
    Message::from_json(&body.to_string()).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn happy_path_handshake_and_connect() {
    let t1 = MockTransport::new("t1", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());

    let session = Session::new(registry, SessionOptions::new());
    session.handshake().unwrap();
    settle().await;

    assert_eq!(session.state(), SessionState::Handshaking);
    let sent = t1.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id().as_deref(), Some("1"));

    t1.deliver(vec![handshake_reply("c1", &["t1"], Some(json!({"reconnect": "retry", "interval": 0})))]);
    settle().await;

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.client_id().as_deref(), Some("c1"));

    let sent = t1.sent_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].channel().as_deref(), Some("/meta/connect"));
    assert_eq!(sent[1].id().as_deref(), Some("2"));
}

#[tokio::test]
async fn transport_swap_on_handshake() {
    let t1 = MockTransport::new("t1", "1.0");
    let t2 = MockTransport::new("t2", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());
    registry.register(t2.clone());

    let session = Session::new(registry, SessionOptions::new());
    session.handshake().unwrap();
    settle().await;

    t1.deliver(vec![handshake_reply("c1", &["t2"], None)]);
    settle().await;

    assert_eq!(t1.destroy_count.load(Ordering::SeqCst), 1);
    assert_eq!(t2.init_count.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Connected);

    // the connect request must have gone out on t2, not t1
    assert!(t2.sent_messages().iter().any(|m| m.channel().as_deref() == Some("/meta/connect")));
}

#[tokio::test]
async fn no_common_transport_surfaces_error_and_leaves_t1_untouched() {
    let t1 = MockTransport::new("t1", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());

    let session = Session::new(registry, SessionOptions::new());

    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors2 = errors.clone();
    session.add_error_listener(Arc::new(move |err| errors2.lock().unwrap().push(err.to_string())));
    settle().await;

    session.handshake().unwrap();
    settle().await;

    t1.deliver(vec![handshake_reply("c1", &["t2"], None)]);
    settle().await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(t1.destroy_count.load(Ordering::SeqCst), 0);
    assert!(!errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn advice_handshake_triggers_rehandshake_after_interval() {
    let t1 = MockTransport::new("t1", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());

    let session = Session::new(registry, SessionOptions::new());
    session.handshake().unwrap();
    settle().await;
    t1.deliver(vec![handshake_reply("c1", &["t1"], Some(json!({"reconnect": "retry", "interval": 0})))]);
    settle().await;
    assert_eq!(session.state(), SessionState::Connected);

    // connect reply instructs the client to re-handshake after 50ms
    let connect_id = t1.sent_messages().last().unwrap().id().unwrap();
    let reply = Message::from_json(
        &json!({
            "channel": "/meta/connect",
            "successful": true,
            "id": connect_id,
            "advice": {"reconnect": "handshake", "interval": 50},
        })
        .to_string(),
    )
    .unwrap();
    t1.deliver(vec![reply]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.state(), SessionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(session.state(), SessionState::Handshaking);
}

#[tokio::test]
async fn extension_veto_prevents_send_and_times_out() {
    struct VetoOutgoingMeta;
    impl Extension for VetoOutgoingMeta {
        fn outgoing_meta(&self, _message: &Message) -> Result<Option<Message>, ExtensionError> {
            Ok(None)
        }
    }

    let t1 = MockTransport::new("t1", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());

    let session = Session::new(
        registry,
        SessionOptions::new().with_handshake_timeout(Duration::from_millis(40)),
    );
    session.add_extension(Arc::new(VetoOutgoingMeta));

    session.handshake().unwrap();
    settle().await;

    assert_eq!(session.state(), SessionState::Handshaking);
    assert!(t1.sent_messages().is_empty());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn publish_never_leaks_client_id_and_reaches_subscribers() {
    let t1 = MockTransport::new("t1", "1.0");
    let mut registry = TransportRegistry::new();
    registry.register(t1.clone());

    let session = Session::new(registry, SessionOptions::new());
    session.handshake().unwrap();
    settle().await;
    t1.deliver(vec![handshake_reply("c1", &["t1"], Some(json!({"reconnect": "retry", "interval": 0})))]);
    settle().await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    let channel = session.channel("/t").unwrap();
    channel
        .subscribe(Arc::new(move |message: &Message| received2.lock().unwrap().push(message.clone())))
        .await
        .unwrap();
    settle().await;

    // a second, independently-subscribed listener on the same channel
    let received_other = Arc::new(Mutex::new(Vec::new()));
    let received_other2 = received_other.clone();
    channel
        .subscribe(Arc::new(move |message: &Message| received_other2.lock().unwrap().push(message.clone())))
        .await
        .unwrap();

    session.publish("/t", json!({"x": 1}));
    settle().await;

    let sent = t1.sent_messages();
    let publish = sent.iter().find(|m| m.channel().as_deref() == Some("/t")).unwrap();
    assert!(publish.client_id().is_none());

    // deliver the broker's fan-out copy back in, as a second client would see it
    t1.deliver(vec![Message::from_json(&json!({"channel": "/t", "data": {"x": 1}, "id": publish.id()}).to_string())
        .unwrap()]);
    settle().await;

    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(received_other.lock().unwrap().len(), 1);
    assert!(received.lock().unwrap()[0].client_id().is_none());
}
