//! Per-connection state machine.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one server connection.
///
/// `Launching → Handshaking → Ready → Closing → Closed`, and any state but
/// `Closed` may fall to `Failed`. Tool calls are served only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Launching,
    Handshaking,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Whether a connection in this state still occupies its server name.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Launching, Handshaking) | (Handshaking, Ready) | (Closing, Closed) => true,
            (Launching | Handshaking | Ready, Closing) => true,
            (Launching | Handshaking | Ready | Closing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Launching => "Launching",
            Self::Handshaking => "Handshaking",
            Self::Ready => "Ready",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_happy_path_is_legal() {
        assert!(Launching.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn test_failed_reachable_from_everything_but_closed() {
        for state in [Launching, Handshaking, Ready, Closing] {
            assert!(state.can_transition_to(Failed), "{state} -> Failed");
        }
        assert!(!Closed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_no_skipping_or_reviving() {
        assert!(!Launching.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Handshaking));
        assert!(!Closed.can_transition_to(Launching));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Closed));
    }

    #[test]
    fn test_live_and_terminal_partition_states() {
        assert!(Closing.is_live());
        assert!(Launching.is_live());
        assert!(Closed.is_terminal());
        assert!(!Failed.is_live());
        assert_eq!(Ready.to_string(), "Ready");
    }
}
