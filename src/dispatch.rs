//! Inbound message routing to channel subscribers (spec §4.7).
//!
//! A listener panic or assertion failure is isolated the same way a
//! faulty [`Extension`](crate::extension::Extension) hook is (spec §4.4,
//! §7 "ListenerError"): logged, and the remaining listeners still run.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::channel::Channel;
use crate::message::Message;

/// Invokes every listener currently subscribed to `channel` with
/// `message`, in registration order (spec §4.2, §5 "delivered ... in the
/// order the transport surfaced them"). Walks a fixed snapshot for
/// iteration order, but re-checks each listener's live membership right
/// before invoking it, so one unsubscribed by an earlier listener's own
/// callback, within this same dispatch, is not invoked (spec §4.2: "one
/// removed during dispatch is not invoked further").
pub(crate) fn notify(channel: &Channel, message: &Message) {
    for listener in channel.snapshot().iter() {
        if !channel.contains(listener) {
            continue;
        }
        let result = catch_unwind(AssertUnwindSafe(|| listener.on_message(message)));
        if result.is_err() {
            tracing::warn!(channel = channel.name(), "listener panicked, isolating");
        }
    }
}

/// Notifies every channel in `channels` (already ordered most-specific
/// first by [`ChannelRegistry::matching`](crate::channel::ChannelRegistry::matching)).
pub(crate) fn notify_matching(channels: &[std::sync::Arc<Channel>], message: &Message) {
    for channel in channels {
        notify(channel, message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::notify;
    use crate::channel::{Channel, ChannelRegistry, ListenerHandle, MessageListener};
    use crate::message::Message;

    struct Unsubscriber {
        channel: Arc<Channel>,
        target: ListenerHandle,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MessageListener for Unsubscriber {
        fn on_message(&self, _message: &Message) {
            self.calls.lock().unwrap().push("a");
            self.channel.unsubscribe(&self.target);
        }
    }

    struct Recorder {
        label: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MessageListener for Recorder {
        fn on_message(&self, _message: &Message) {
            self.calls.lock().unwrap().push(self.label);
        }
    }

    #[test]
    fn listener_unsubscribed_mid_dispatch_is_not_invoked() {
        let registry = ChannelRegistry::new();
        let channel = registry.get("/a", true).unwrap().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let listener_b: ListenerHandle = Arc::new(Recorder { label: "b", calls: calls.clone() });
        let listener_a: ListenerHandle = Arc::new(Unsubscriber {
            channel: channel.clone(),
            target: listener_b.clone(),
            calls: calls.clone(),
        });

        // registration order matters: a must run before b for this to
        // exercise the reentrant-unsubscribe path.
        channel.subscribe(listener_a);
        channel.subscribe(listener_b);

        notify(&channel, &Message::new());

        assert_eq!(*calls.lock().unwrap(), vec!["a"]);
    }
}
