//! Sampler lifecycle events.
//!
//! The sampling loop broadcasts a [`SamplerEvent`] for every connection
//! state change. Events are diagnostic only: nothing in the loop waits on a
//! receiver, and sending with no receivers is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pmsense_types::Sample;

use crate::driver::DriverVariant;

/// Events emitted by the sampler.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SamplerEvent {
    /// A session was opened on `port`.
    Connected { port: String, driver: DriverVariant },
    /// Every candidate port failed.
    ConnectFailed {
        candidates: Vec<String>,
        retry_in_ms: u64,
    },
    /// No driver backend is available. Sent once.
    DriverUnavailable,
    /// A start command succeeded on the current session.
    MeasurementStarted { port: String, with_format: bool },
    /// The session was torn down.
    Disconnected {
        port: String,
        reason: DisconnectReason,
    },
    /// A read produced no sample.
    ReadFailed {
        port: String,
        failures: u32,
        reason: String,
    },
    /// Too many consecutive reads failed; a reconnect follows.
    FailureThresholdReached { port: String, failures: u32 },
    /// A sample was read.
    Sample { sample: Sample },
    /// Sampling was paused.
    Paused,
    /// Sampling was resumed.
    Resumed,
    /// The target port changed (`None` means auto-scan).
    PortChanged { port: Option<String> },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The target port was changed.
    PortChanged,
    /// The consecutive-failure threshold was reached.
    ReadFailures,
    /// The sampler is shutting down.
    Shutdown,
    /// An operator released the port.
    UserRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PortChanged => write!(f, "port changed"),
            Self::ReadFailures => write!(f, "too many failed reads"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::UserRequested => write!(f, "released by operator"),
        }
    }
}

/// Sender for sampler events.
pub type EventSender = broadcast::Sender<SamplerEvent>;

/// Receiver for sampler events.
pub type EventReceiver = broadcast::Receiver<SamplerEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
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
    pub fn send(&self, event: SamplerEvent) {
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
