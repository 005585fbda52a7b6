//! Server-issued reconnection advice (spec §3 GLOSSARY, §4.5).

use std::time::Duration;

use serde_json::Value;

/// The `reconnect` action of an [`Advice`] object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Schedule another connect after `interval`.
    Retry,
    /// Drop to `DISCONNECTED` and re-handshake after `interval` (spec §9
    /// "Open questions" (b): the source treats this as an error; this spec
    /// follows documented Bayeux semantics and re-handshakes).
    Handshake,
    /// Stay idle; the user must call `handshake()` to revive.
    None,
    /// An action this client does not recognize. Treated as `Retry` with a
    /// zero interval (spec §4.5).
    Unknown(String),
}

/// A server-issued `advice` object (spec wire format, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    pub reconnect: ReconnectAction,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for Advice {
    /// The default advice assumed before any server advice has been seen:
    /// retry immediately.
    fn default() -> Self {
        Self { reconnect: ReconnectAction::Retry, interval: Duration::ZERO, timeout: None }
    }
}

impl Advice {
    /// Parses an `advice` JSON value. Negative intervals/timeouts are
    /// clamped to zero (spec §4.5). A missing `reconnect` field defaults to
    /// `retry`; a missing `interval` defaults to 0ms.
    pub fn parse(value: &Value) -> Self {
        let reconnect = match value.get("reconnect").and_then(Value::as_str) {
            Some("retry") | None => ReconnectAction::Retry,
            Some("handshake") => ReconnectAction::Handshake,
            Some("none") => ReconnectAction::None,
            Some(other) => ReconnectAction::Unknown(other.to_string()),
        };

        let interval = clamp_millis(value.get("interval"));
        let timeout = value.get("timeout").map(|_| clamp_millis(value.get("timeout")));

        Self { reconnect, interval, timeout }
    }

    /// Merges `update` on top of `self`: fields present in `update`
    /// override; this is the cache-update operation spec §4.5 requires
    /// ("update the cached advice") for servers that only send a partial
    /// advice object on subsequent replies.
    pub fn merged_with(&self, update: &Value) -> Self {
        let mut merged = self.clone();
        if let Some(reconnect) = update.get("reconnect").and_then(Value::as_str) {
            merged.reconnect = match reconnect {
                "retry" => ReconnectAction::Retry,
                "handshake" => ReconnectAction::Handshake,
                "none" => ReconnectAction::None,
                other => ReconnectAction::Unknown(other.to_string()),
            };
        }
        if update.get("interval").is_some() {
            merged.interval = clamp_millis(update.get("interval"));
        }
        if update.get("timeout").is_some() {
            merged.timeout = Some(clamp_millis(update.get("timeout")));
        }
        merged
    }

    /// The effective reconnect action, with unknown actions normalized to
    /// `retry` with a zero interval (spec §4.5).
    pub fn effective(&self) -> (ReconnectActionKind, Duration) {
        match &self.reconnect {
            ReconnectAction::Retry => (ReconnectActionKind::Retry, self.interval),
            ReconnectAction::Handshake => (ReconnectActionKind::Handshake, self.interval),
            ReconnectAction::None => (ReconnectActionKind::None, Duration::ZERO),
            ReconnectAction::Unknown(action) => {
                tracing::warn!(%action, "unknown reconnect advice, treating as retry(0)");
                (ReconnectActionKind::Retry, Duration::ZERO)
            }
        }
    }
}

/// The normalized (post-"unknown is retry(0)") reconnect action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectActionKind {
    Retry,
    Handshake,
    None,
}

fn clamp_millis(value: Option<&Value>) -> Duration {
    let millis = value.and_then(Value::as_i64).unwrap_or(0);
    Duration::from_millis(millis.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_interval_clamps_to_zero() {
        let advice = Advice::parse(&serde_json::json!({"reconnect": "retry", "interval": -500}));
        assert_eq!(advice.interval, Duration::ZERO);
    }

    #[test]
    fn missing_interval_defaults_to_zero() {
        let advice = Advice::parse(&serde_json::json!({"reconnect": "retry"}));
        assert_eq!(advice.interval, Duration::ZERO);
    }

    #[test]
    fn unknown_action_normalizes_to_retry_zero() {
        let advice = Advice::parse(&serde_json::json!({"reconnect": "explode", "interval": 5000}));
        assert_eq!(advice.effective(), (ReconnectActionKind::Retry, Duration::ZERO));
    }

    #[test]
    fn none_action_has_no_interval() {
        let advice = Advice::parse(&serde_json::json!({"reconnect": "none", "interval": 5000}));
        assert_eq!(advice.effective(), (ReconnectActionKind::None, Duration::ZERO));
    }
}
