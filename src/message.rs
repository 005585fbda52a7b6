//! The Bayeux message model (spec §3, §4.1).
//!
//! A [`Message`] is a cheap, clonable handle (`Arc<RwLock<Inner>>`) over a
//! JSON object. It starts out mutable, so a session can build up a request
//! field by field, then transitions exactly once to a frozen state carrying
//! the exact bytes that were (or will be) put on the wire — mirroring the
//! teacher's `Box<RawValue>` responses, which are kept verbatim until a
//! caller asks to deserialize them.

use std::sync::{Arc, RwLock, Weak};

use serde_json::{Map, Value};

/// The five reserved Bayeux meta-channels (spec §3 "MetaChannel").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaChannelKind {
    Handshake,
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
}

impl MetaChannelKind {
    pub const ALL: [MetaChannelKind; 5] = [
        Self::Handshake,
        Self::Connect,
        Self::Disconnect,
        Self::Subscribe,
        Self::Unsubscribe,
    ];

    pub fn channel(self) -> &'static str {
        match self {
            Self::Handshake => "/meta/handshake",
            Self::Connect => "/meta/connect",
            Self::Disconnect => "/meta/disconnect",
            Self::Subscribe => "/meta/subscribe",
            Self::Unsubscribe => "/meta/unsubscribe",
        }
    }

    /// Returns the meta kind for a channel path, or `None` if `channel` is
    /// not one of the five reserved meta-channels.
    pub fn from_channel(channel: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.channel() == channel)
    }
}

/// Error returned when mutating a message that has already been frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyFrozenError;

impl std::fmt::Display for AlreadyFrozenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("message is frozen and can no longer be mutated")
    }
}

impl std::error::Error for AlreadyFrozenError {}

struct Inner {
    fields: Map<String, Value>,
    /// `Some` once `freeze` has been called; holds the exact serialized text.
    frozen_json: Option<Box<str>>,
    /// Weak back-reference to the paired request/response. Never kept alive
    /// past the correlation window by this link alone (spec §9).
    associated: Option<Weak<RwLock<Inner>>>,
}

/// A Bayeux message: a string-keyed JSON object, mutable until frozen.
///
/// Cloning a `Message` yields another handle to the *same* underlying data
/// (it is an `Arc` handle, not a deep copy) so that a session can freeze a
/// message, hand a clone to the transport, and keep another clone around to
/// later link an `associated` reply to it.
#[derive(Clone)]
pub struct Message {
    inner: Arc<RwLock<Inner>>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Recognized top-level Bayeux fields (spec §3).
    pub const FIELD_CHANNEL: &'static str = "channel";
    pub const FIELD_CLIENT_ID: &'static str = "clientId";
    pub const FIELD_ID: &'static str = "id";
    pub const FIELD_SUCCESSFUL: &'static str = "successful";
    pub const FIELD_SUBSCRIPTION: &'static str = "subscription";
    pub const FIELD_DATA: &'static str = "data";
    pub const FIELD_EXT: &'static str = "ext";
    pub const FIELD_ADVICE: &'static str = "advice";
    pub const FIELD_SUPPORTED_CONNECTION_TYPES: &'static str = "supportedConnectionTypes";
    pub const FIELD_VERSION: &'static str = "version";
    pub const FIELD_MINIMUM_VERSION: &'static str = "minimumVersion";
    pub const FIELD_CONNECTION_TYPE: &'static str = "connectionType";

    /// Creates a new, empty, mutable message.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                fields: Map::new(),
                frozen_json: None,
                associated: None,
            })),
        }
    }

    /// Parses `json` as an already-final wire message and freezes it in one
    /// step. Used for inbound messages received from a transport.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                fields,
                frozen_json: Some(json.into()),
                associated: None,
            })),
        })
    }

    /// Returns `true` if this message has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.read().unwrap().frozen_json.is_some()
    }

    /// Reads a field by name.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().unwrap().fields.get(name).cloned()
    }

    /// Sets a field. Fails if the message is already frozen.
    pub fn set(&self, name: &str, value: Value) -> Result<(), AlreadyFrozenError> {
        let mut inner = self.inner.write().unwrap();
        if inner.frozen_json.is_some() {
            return Err(AlreadyFrozenError);
        }
        inner.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Removes a field. Fails if the message is already frozen.
    pub fn remove(&self, name: &str) -> Result<Option<Value>, AlreadyFrozenError> {
        let mut inner = self.inner.write().unwrap();
        if inner.frozen_json.is_some() {
            return Err(AlreadyFrozenError);
        }
        Ok(inner.fields.remove(name))
    }

    pub fn channel(&self) -> Option<String> {
        self.get(Self::FIELD_CHANNEL).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn client_id(&self) -> Option<String> {
        self.get(Self::FIELD_CLIENT_ID).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn id(&self) -> Option<String> {
        self.get(Self::FIELD_ID).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn successful(&self) -> Option<bool> {
        self.get(Self::FIELD_SUCCESSFUL).and_then(|v| v.as_bool())
    }

    pub fn subscription(&self) -> Option<String> {
        self.get(Self::FIELD_SUBSCRIPTION).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn data(&self) -> Option<Value> {
        self.get(Self::FIELD_DATA)
    }

    pub fn ext(&self) -> Option<Value> {
        self.get(Self::FIELD_EXT)
    }

    pub fn advice(&self) -> Option<Value> {
        self.get(Self::FIELD_ADVICE)
    }

    /// The Bayeux meta-channel kind of this message, if its `channel` is one
    /// of the five reserved meta-channels.
    pub fn meta_kind(&self) -> Option<MetaChannelKind> {
        self.channel().as_deref().and_then(MetaChannelKind::from_channel)
    }

    /// Freezes the message, tagging it with the exact JSON text that was (or
    /// will be) transmitted. A second call fails with [`AlreadyFrozenError`].
    pub fn freeze(&self, json: impl Into<Box<str>>) -> Result<(), AlreadyFrozenError> {
        let mut inner = self.inner.write().unwrap();
        if inner.frozen_json.is_some() {
            return Err(AlreadyFrozenError);
        }
        inner.frozen_json = Some(json.into());
        Ok(())
    }

    /// Returns the message's JSON text: the stored text if frozen, or a
    /// freshly serialized snapshot of the current fields otherwise.
    pub fn get_json(&self) -> String {
        let inner = self.inner.read().unwrap();
        match &inner.frozen_json {
            Some(json) => json.to_string(),
            None => serde_json::to_string(&Value::Object(inner.fields.clone()))
                .expect("message fields are always valid JSON"),
        }
    }

    /// Links `other` as this message's associated message (e.g. a reply
    /// linked to its request). The link is a weak back-reference: `other`'s
    /// lifetime is not extended by this call.
    pub fn set_associated(&self, other: &Message) {
        self.inner.write().unwrap().associated = Some(Arc::downgrade(&other.inner));
    }

    /// Returns the associated message, if it is still alive.
    pub fn associated(&self) -> Option<Message> {
        let weak = self.inner.read().unwrap().associated.clone()?;
        weak.upgrade().map(|inner| Message { inner })
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel())
            .field("id", &self.id())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_is_one_shot() {
        let msg = Message::new();
        msg.set("channel", Value::String("/meta/handshake".into())).unwrap();
        msg.freeze(msg.get_json()).unwrap();
        assert!(msg.is_frozen());
        assert_eq!(msg.freeze("{}"), Err(AlreadyFrozenError));
    }

    #[test]
    fn mutation_fails_after_freeze() {
        let msg = Message::new();
        msg.freeze("{}").unwrap();
        assert_eq!(msg.set("x", Value::Bool(true)), Err(AlreadyFrozenError));
        assert_eq!(msg.remove("x"), Err(AlreadyFrozenError));
    }

    #[test]
    fn get_json_round_trips_after_freeze() {
        let msg = Message::from_json(r#"{"channel":"/meta/connect","id":"2"}"#).unwrap();
        assert_eq!(msg.get_json(), r#"{"channel":"/meta/connect","id":"2"}"#);
        assert_eq!(msg.channel().as_deref(), Some("/meta/connect"));
    }

    #[test]
    fn publish_has_no_client_id() {
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String("/app/t".into())).unwrap();
        msg.set(Message::FIELD_DATA, serde_json::json!({"x": 1})).unwrap();
        assert!(msg.client_id().is_none());
    }

    #[test]
    fn associated_is_a_weak_link() {
        let request = Message::new();
        let reply = Message::new();
        reply.set_associated(&request);
        assert!(reply.associated().is_some());
        drop(request);
        assert!(reply.associated().is_none());
    }

    #[test]
    fn meta_kind_detection() {
        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String("/meta/subscribe".into())).unwrap();
        assert_eq!(msg.meta_kind(), Some(MetaChannelKind::Subscribe));

        let app = Message::new();
        app.set(Message::FIELD_CHANNEL, Value::String("/app/foo".into())).unwrap();
        assert_eq!(app.meta_kind(), None);
    }
}
