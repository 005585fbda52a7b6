//! The extension pipeline (spec §4.4).
//!
//! A copy-on-write ordered list of user-supplied filters, invoked in
//! registration order for both directions (spec §4.4, §9 "Open questions"
//! (d): the source left incoming order unspecified; this crate fixes it to
//! match outgoing, for determinism). The copy-on-write list itself follows
//! the teacher's approach to its extension-adjacent registries: an
//! `ArcSwap`-backed snapshot that readers traverse without locking
//! (`channel.rs`'s `Channel::listeners` uses the same primitive).

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::message::Message;

/// An error raised by a single [`Extension`] hook. Never propagates past
/// the pipeline: it is logged and the message passes through unchanged
/// (spec §4.4, §7 "ExtensionError").
#[derive(Debug)]
pub struct ExtensionError(pub Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ExtensionError {}

/// A filter in the inbound/outbound message pipelines.
///
/// Each hook returns the (possibly transformed) message to let it continue,
/// `Ok(None)` to veto (drop) it, or `Err` if the extension itself failed.
/// All four hooks default to identity pass-through, so an extension only
/// needs to override the hooks it cares about.
pub trait Extension: Send + Sync {
    fn incoming(&self, message: &Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message.clone()))
    }

    fn outgoing(&self, message: &Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message.clone()))
    }

    fn incoming_meta(&self, message: &Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message.clone()))
    }

    fn outgoing_meta(&self, message: &Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message.clone()))
    }
}

type ExtensionHandle = Arc<dyn Extension>;

/// The ordered chain of registered extensions.
pub struct Extensions {
    list: ArcSwap<Vec<ExtensionHandle>>,
}

impl Default for Extensions {
    fn default() -> Self {
        Self::new()
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self { list: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn add(&self, extension: ExtensionHandle) {
        self.list.rcu(|cur| {
            let mut next = (**cur).clone();
            next.push(extension.clone());
            Arc::new(next)
        });
    }

    pub fn remove(&self, extension: &ExtensionHandle) {
        self.list.rcu(|cur| {
            let next: Vec<_> =
                cur.iter().filter(|e| !Arc::ptr_eq(e, extension)).cloned().collect();
            Arc::new(next)
        });
    }

    pub fn len(&self) -> usize {
        self.list.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `message` through the incoming pipeline. Returns `None` if any
    /// extension vetoed it.
    pub fn run_incoming(&self, is_meta: bool, message: Message) -> Option<Message> {
        self.run(is_meta, message, Direction::Incoming)
    }

    /// Runs `message` through the outgoing pipeline. Returns `None` if any
    /// extension vetoed it.
    pub fn run_outgoing(&self, is_meta: bool, message: Message) -> Option<Message> {
        self.run(is_meta, message, Direction::Outgoing)
    }

    fn run(&self, is_meta: bool, message: Message, direction: Direction) -> Option<Message> {
        // Snapshot once per traversal: extensions added/removed mid-dispatch
        // do not affect this run (spec §4.4, §5).
        let list = self.list.load_full();
        let mut current = message;

        for (index, extension) in list.iter().enumerate() {
            let result = match (direction, is_meta) {
                (Direction::Incoming, false) => extension.incoming(&current),
                (Direction::Incoming, true) => extension.incoming_meta(&current),
                (Direction::Outgoing, false) => extension.outgoing(&current),
                (Direction::Outgoing, true) => extension.outgoing_meta(&current),
            };

            match result {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    tracing::debug!(index, ?direction, "extension vetoed message");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(index, ?direction, %err, "extension hook failed, passing through");
                    // current left unchanged: identity pass-through
                }
            }
        }

        Some(current)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}
