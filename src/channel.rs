//! Channel identity, validation and the channel/subscriber registry
//! (spec §3 "Channel"/"Subscriber", §4.2).

use std::{
    collections::HashMap,
    fmt,
    hash::BuildHasherDefault,
    sync::{Arc, RwLock},
};

use arc_swap::ArcSwap;
use hashers::fx_hash::FxHasher64;

use crate::message::Message;

/// The fast, non-cryptographic hash map the teacher uses for its hot,
/// trusted-key registries (`ethers-connections/src/connections/common.rs`).
type FxHashMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher64>>;

/// A channel name failed the shape invariant in spec §3: non-empty, begins
/// with `/`, no empty segments except an optional trailing `*`/`**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelIdError {
    Empty,
    MissingLeadingSlash,
    EmptySegment,
    WildcardNotTrailing,
}

impl fmt::Display for ChannelIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel name must not be empty"),
            Self::MissingLeadingSlash => write!(f, "channel name must begin with '/'"),
            Self::EmptySegment => write!(f, "channel name must not contain empty segments"),
            Self::WildcardNotTrailing => {
                write!(f, "'*' or '**' is only valid as the trailing segment")
            }
        }
    }
}

impl std::error::Error for ChannelIdError {}

/// The three channel name shapes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelShape {
    /// `/a/b`
    Exact,
    /// `/a/*` — matches exactly `/a/X`.
    Single,
    /// `/a/**` — matches `/a/X`, `/a/X/Y`, …
    Deep,
}

/// A validated, canonical channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    name: String,
}

impl ChannelId {
    /// Validates and canonicalizes `name`.
    pub fn parse(name: &str) -> Result<Self, ChannelIdError> {
        if name.is_empty() {
            return Err(ChannelIdError::Empty);
        }
        if !name.starts_with('/') {
            return Err(ChannelIdError::MissingLeadingSlash);
        }

        let segments: Vec<&str> = name[1..].split('/').collect();
        let last = segments.len() - 1;
        for (i, seg) in segments.iter().enumerate() {
            if seg.is_empty() {
                return Err(ChannelIdError::EmptySegment);
            }
            let is_wildcard = *seg == "*" || *seg == "**";
            if is_wildcard && i != last {
                return Err(ChannelIdError::WildcardNotTrailing);
            }
        }

        Ok(Self { name: name.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ChannelShape {
        if self.name.ends_with("/**") {
            ChannelShape::Deep
        } else if self.name.ends_with("/*") {
            ChannelShape::Single
        } else {
            ChannelShape::Exact
        }
    }

    pub fn is_meta(&self) -> bool {
        self.name.starts_with("/meta/")
    }

    /// Candidate wildcard-pattern names (most specific first) that would
    /// match this channel if it is an exact channel, used at dispatch time
    /// (spec §4.2). The exact channel itself is not included.
    fn wildcard_candidates(&self) -> (Option<String>, Vec<String>) {
        let segments: Vec<&str> = self.name[1..].split('/').collect();
        let n = segments.len();

        let parent = segments[..n - 1].join("/");
        let single =
            Some(if parent.is_empty() { "/*".to_string() } else { format!("/{parent}/*") });

        let mut deep = Vec::new();
        // most-specific (longest prefix) first
        for k in (1..n).rev() {
            deep.push(format!("/{}/**", segments[..k].join("/")));
        }

        (single, deep)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A handle invoked once per matching, delivered message.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message);
}

impl<F: Fn(&Message) + Send + Sync> MessageListener for F {
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// A registered listener, comparable by identity (`Arc::ptr_eq`) so that
/// adding the same listener twice is idempotent (spec §3 "Subscriber").
pub type ListenerHandle = Arc<dyn MessageListener>;

/// A channel: a name plus its subscriber set.
pub struct Channel {
    id: ChannelId,
    listeners: ArcSwap<Vec<ListenerHandle>>,
}

impl Channel {
    fn new(id: ChannelId) -> Self {
        Self { id, listeners: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    /// Adds `listener`. Returns `true` if this was the first listener on the
    /// channel (the caller uses this to decide whether to send a
    /// `/meta/subscribe`, spec §4.6). Adding an already-registered listener
    /// (by `Arc` identity) is idempotent and returns `false`.
    pub fn subscribe(&self, listener: ListenerHandle) -> bool {
        let mut became_first = false;
        self.listeners.rcu(|cur| {
            if cur.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                became_first = false;
                return cur.clone();
            }

            became_first = cur.is_empty();
            let mut next = (**cur).clone();
            next.push(listener.clone());
            Arc::new(next)
        });
        became_first
    }

    /// Removes one registration of `listener`. Returns `true` if the
    /// channel now has no listeners (the caller uses this to decide whether
    /// to send a `/meta/unsubscribe`, spec §4.6).
    pub fn unsubscribe(&self, listener: &ListenerHandle) -> bool {
        let mut now_empty = false;
        self.listeners.rcu(|cur| {
            if !cur.iter().any(|l| Arc::ptr_eq(l, listener)) {
                now_empty = cur.is_empty();
                return cur.clone();
            }

            let mut next = Vec::with_capacity(cur.len().saturating_sub(1));
            let mut removed = false;
            for l in cur.iter() {
                if !removed && Arc::ptr_eq(l, listener) {
                    removed = true;
                    continue;
                }
                next.push(l.clone());
            }
            now_empty = next.is_empty();
            Arc::new(next)
        });
        now_empty
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.load().is_empty()
    }

    /// Snapshots the current listener set. A listener added after this call
    /// returns is not part of the snapshot; one removed after is (removal is
    /// only observed by callers who re-check membership before invoking, via
    /// [`Channel::contains`]).
    pub fn snapshot(&self) -> Arc<Vec<ListenerHandle>> {
        self.listeners.load_full()
    }

    /// Whether `listener` is in the *current* (not snapshotted) listener set.
    /// Used by dispatch to re-check a listener's live membership right
    /// before invoking it, so a listener unsubscribed mid-dispatch by an
    /// earlier listener's callback is not invoked (spec §4.2).
    pub fn contains(&self, listener: &ListenerHandle) -> bool {
        self.listeners.load().iter().any(|l| Arc::ptr_eq(l, listener))
    }
}

/// The canonical channel storage: a flat mapping by name (spec §4.2).
/// Concurrent-safe; per-channel listener lists are copy-on-write (spec §5).
pub struct ChannelRegistry {
    channels: RwLock<FxHashMap<String, Arc<Channel>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { channels: RwLock::new(FxHashMap::default()) }
    }

    /// Returns the channel for `name`, validating it first. If
    /// `create_if_missing` is `false` and the channel does not yet exist,
    /// returns `Ok(None)`.
    pub fn get(
        &self,
        name: &str,
        create_if_missing: bool,
    ) -> Result<Option<Arc<Channel>>, ChannelIdError> {
        let id = ChannelId::parse(name)?;

        if let Some(chan) = self.channels.read().unwrap().get(id.as_str()) {
            return Ok(Some(chan.clone()));
        }

        if !create_if_missing {
            return Ok(None);
        }

        let mut channels = self.channels.write().unwrap();
        let chan = channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Channel::new(id)))
            .clone();
        Ok(Some(chan))
    }

    /// Resolves the ordered set of channels whose subscribers should receive
    /// a message published on exact channel `name` (spec §4.2): the exact
    /// channel itself, then matching single-segment wildcards, then matching
    /// deep wildcards, most-specific-first within each bucket. Channels with
    /// no listeners and channels that were never created are omitted.
    pub fn matching(&self, name: &str) -> Result<Vec<Arc<Channel>>, ChannelIdError> {
        let id = ChannelId::parse(name)?;
        let (single, deep) = id.wildcard_candidates();

        let channels = self.channels.read().unwrap();
        let mut out = Vec::new();

        if let Some(chan) = channels.get(id.as_str()) {
            out.push(chan.clone());
        }
        if let Some(single) = single {
            if let Some(chan) = channels.get(&single) {
                out.push(chan.clone());
            }
        }
        for deep in deep {
            if let Some(chan) = channels.get(&deep) {
                out.push(chan.clone());
            }
        }

        Ok(out)
    }
}
