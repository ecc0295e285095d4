//! Status notifications for whatever shows the user what is going on.
//!
//! The orchestrators publish a [`StatusEvent`] at every lifecycle change.  A
//! tray icon or GUI would implement [`StatusSink`]; the binaries use
//! [`LoggingStatus`], which writes each event to the log.  Events are plain
//! serializable values so they can be forwarded over any IPC boundary as-is.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::topology::ScreenName;

/// A lifecycle change worth showing to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Starting,
    Listening { addr: SocketAddr },
    Connecting { addr: SocketAddr },
    Connected { screen: ScreenName },
    Disconnected { screen: Option<ScreenName>, reason: String },
    /// Connected screens, in configuration order, the local screen first.
    ClientListChanged { screens: Vec<ScreenName> },
    /// The cursor moved to `screen`.
    Switched { screen: ScreenName },
    /// The peer speaks a protocol version this build cannot talk to.
    Incompatible { major: i16, minor: i16 },
    ConnectionFailed { reason: String },
    RestartRequested,
    Stopped,
}

/// Receives status events.
pub trait StatusSink {
    fn publish(&mut self, event: StatusEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatus;

impl StatusSink for LoggingStatus {
    fn publish(&mut self, event: StatusEvent) {
        match &event {
            StatusEvent::Incompatible { .. } | StatusEvent::ConnectionFailed { .. } => {
                warn!(?event, "status");
            }
            _ => info!(?event, "status"),
        }
    }
}

/// Keeps every event for tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingStatus {
    pub events: Vec<StatusEvent>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and forgets the events recorded so far.
    pub fn take(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.events)
    }
}

impl StatusSink for RecordingStatus {
    fn publish(&mut self, event: StatusEvent) {
        self.events.push(event);
    }
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn publish(&mut self, event: StatusEvent) {
        (**self).publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_status_keeps_order() {
        // Arrange
        let mut sink = RecordingStatus::new();

        // Act
        sink.publish(StatusEvent::Starting);
        sink.publish(StatusEvent::Connected {
            screen: ScreenName::from("b"),
        });

        // Assert
        assert_eq!(
            sink.take(),
            [
                StatusEvent::Starting,
                StatusEvent::Connected {
                    screen: ScreenName::from("b")
                }
            ]
        );
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<dyn StatusSink> = Box::new(LoggingStatus);
        sink.publish(StatusEvent::Stopped);
    }
}
