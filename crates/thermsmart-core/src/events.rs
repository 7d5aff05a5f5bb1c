//! Session event system.
//!
//! A [`Session`](crate::Session) publishes [`SessionEvent`]s for state
//! transitions, command writes, loaded payloads and disconnects. Events are
//! informational; dropping every receiver does not affect the session.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::SessionState;

/// Events emitted by a session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged { state: SessionState },
    /// The `0xD2` command was written to the sensor.
    CommandWritten { sensor_id: String },
    /// A command-response payload was received and cached.
    PayloadLoaded { sensor_id: String, len: usize },
    /// The link went down.
    Disconnected {
        sensor_id: String,
        reason: DisconnectReason,
    },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Normal disconnection requested by user.
    UserRequested,
    /// The radio reported the link as lost.
    LinkLost,
}

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::PayloadLoaded {
            sensor_id: "mock-aabbccddeeff".to_string(),
            len: 14,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"payload_loaded""#));
        assert!(json.contains(r#""len":14"#));

        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_state_event_serialization() {
        let event = SessionEvent::StateChanged {
            state: SessionState::Ready,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"state_changed","state":"ready"}"#);
    }

    #[test]
    fn test_disconnect_reason_serialization() {
        let event = SessionEvent::Disconnected {
            sensor_id: "x".to_string(),
            reason: DisconnectReason::LinkLost,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""reason":"link_lost""#));
    }

    #[tokio::test]
    async fn test_dispatcher() {
        let dispatcher = EventDispatcher::new(8);
        assert_eq!(dispatcher.receiver_count(), 0);
        // Sending without receivers is fine
        dispatcher.send(SessionEvent::CommandWritten {
            sensor_id: "x".to_string(),
        });

        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);
        dispatcher.send(SessionEvent::CommandWritten {
            sensor_id: "y".to_string(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::CommandWritten {
                sensor_id: "y".to_string()
            }
        );
    }
}
