//! The client-initiated subscribe/unsubscribe protocol (spec §4.6).
//!
//! [`SessionChannel`] is the handle returned by
//! [`Session::channel`](crate::session::Session::channel) and
//! [`Session::meta_channel`](crate::session::Session::meta_channel). It
//! combines the local, always-synchronous [`Channel`] registry with the
//! network round trip a first subscriber / last unsubscriber triggers on
//! an application channel — meta-channels only ever gain local listeners
//! (subscribing to `/meta/handshake` does not itself produce a Bayeux
//! `/meta/subscribe` request).
//!
//! [`ChannelStream`] layers a `tokio_stream::Stream` on top, the same
//! ergonomic role the teacher's `SubscriptionStream` in `sub.rs` plays
//! over a raw notification receiver.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;

use crate::{
    channel::{Channel, ListenerHandle, MessageListener},
    error::RequestError,
    message::Message,
    session::worker::Command,
};

/// A handle over one channel (application or meta), able to subscribe
/// local listeners and, where applicable, perform the server round trip.
#[derive(Clone)]
pub struct SessionChannel {
    channel: Arc<Channel>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl SessionChannel {
    pub(crate) fn new(channel: Arc<Channel>, command_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { channel, command_tx }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Adds `listener`. For an application channel, the first subscriber
    /// triggers a `/meta/subscribe` round trip; the returned future
    /// resolves once the server replies (or the request times out). A
    /// server rejection does not remove the local registration (spec
    /// §4.6: "the local subscription is kept").
    pub async fn subscribe(&self, listener: ListenerHandle) -> Result<(), RequestError> {
        let became_first = self.channel.subscribe(listener);
        if !became_first || self.channel.id().is_meta() {
            return Ok(());
        }
        self.request(RequestShape::Subscribe).await
    }

    /// Removes one registration of `listener`. Mirrors [`subscribe`] for
    /// the last-unsubscriber case.
    pub async fn unsubscribe(&self, listener: &ListenerHandle) -> Result<(), RequestError> {
        let now_empty = self.channel.unsubscribe(listener);
        if !now_empty || self.channel.id().is_meta() {
            return Ok(());
        }
        self.request(RequestShape::Unsubscribe).await
    }

    async fn request(&self, kind: RequestShape) -> Result<(), RequestError> {
        let (tx, rx) = oneshot::channel();
        let command = match kind {
            RequestShape::Subscribe => Command::Subscribe { channel: self.name().to_string(), responder: tx },
            RequestShape::Unsubscribe => Command::Unsubscribe { channel: self.name().to_string(), responder: tx },
        };
        if self.command_tx.send(command).is_err() {
            return Err(RequestError { channel: self.name().to_string(), reason: "session shut down".to_string() });
        }
        rx.await.unwrap_or_else(|_| {
            Err(RequestError {
                channel: self.name().to_string(),
                reason: "session shut down before reply".to_string(),
            })
        })
    }

    /// Subscribes `listener` and additionally returns a [`ChannelStream`]
    /// yielding every message delivered to this channel, without waiting
    /// for the subscribe acknowledgement (spec §9/A.4: a `tokio_stream`
    /// convenience wrapper, the same role `SubscriptionStream` plays for
    /// the teacher).
    pub fn listen(&self) -> ChannelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: ListenerHandle = Arc::new(Forwarder(tx));
        let became_first = self.channel.subscribe(listener.clone());

        if became_first && !self.channel.id().is_meta() {
            let (responder, _ignored) = oneshot::channel();
            let _ = self
                .command_tx
                .send(Command::Subscribe { channel: self.name().to_string(), responder });
        }

        ChannelStream { channel: self.channel.clone(), listener, rx }
    }
}

enum RequestShape {
    Subscribe,
    Unsubscribe,
}

struct Forwarder(mpsc::UnboundedSender<Message>);

impl MessageListener for Forwarder {
    fn on_message(&self, message: &Message) {
        let _ = self.0.send(message.clone());
    }
}

/// A stream of messages delivered to a [`SessionChannel`]. Unsubscribes
/// its listener on drop.
pub struct ChannelStream {
    channel: Arc<Channel>,
    listener: ListenerHandle,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Stream for ChannelStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        self.channel.unsubscribe(&self.listener);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::channel::ChannelRegistry;

    #[tokio::test]
    async fn listen_receives_published_messages() {
        let registry = ChannelRegistry::new();
        let chan = registry.get("/app/t", true).unwrap().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session_channel = SessionChannel::new(chan.clone(), tx);

        let mut stream = session_channel.listen();

        let msg = Message::new();
        msg.set(Message::FIELD_CHANNEL, Value::String("/app/t".into())).unwrap();
        for listener in chan.snapshot().iter() {
            listener.on_message(&msg);
        }

        let received = stream.next().await.unwrap();
        assert_eq!(received.channel().as_deref(), Some("/app/t"));
    }
}
