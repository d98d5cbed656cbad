//! Session status events.
//!
//! | Event | Source |
//! |-------|--------|
//! | `SessionStatusEvent` | `LiveSession::subscribe_status` |

use serde::{Deserialize, Serialize};

/// Emitted on every session state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Child-friendly message for `error`; never a raw technical string.
    pub detail: Option<String>,
}

/// Lifecycle phase as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Devices acquired or being acquired, handshake in flight.
    Connecting,
    /// Streaming both ways.
    Active,
    /// Channel ended normally. A new session may be started.
    Closed,
    /// Terminal failure. `detail` says what the child should do.
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Error,
            detail: Some("microphone permission required".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "microphone permission required");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<SessionStatus>(r#""Active""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn only_closed_and_error_are_terminal() {
        assert!(!SessionStatus::Connecting.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
    }
}
