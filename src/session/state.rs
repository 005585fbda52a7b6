//! The session lifecycle state machine (spec §3 "Session state", §4.5).

use std::fmt;

/// The session's lifecycle state. Exactly one of these at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Handshaking => "HANDSHAKING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_casing_style() {
        assert_eq!(SessionState::Disconnected.to_string(), "DISCONNECTED");
        assert_eq!(SessionState::Handshaking.to_string(), "HANDSHAKING");
    }
}
