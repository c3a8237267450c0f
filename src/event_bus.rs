//! # Event Bus
//!
//! Broadcast hub for loader lifecycle events. The coordinator and the
//! activation engine publish here; observers (diagnostics, tests, an embedding
//! shell) subscribe. Nothing in the pipeline depends on a subscriber being
//! present.
//!
//! Failures travel on a separate error channel so a slow event consumer never
//! hides an activation failure from an error consumer.
//!
//! ```rust,no_run
//! # use stagehand::event_bus::{EventBus, LoaderEvent};
//! # async fn example() {
//! let bus = EventBus::new(16);
//! let (mut events, _errors) = bus.subscribe();
//! bus.publish(LoaderEvent::ViewChanged { view: "V1".to_string() });
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.event, LoaderEvent::ViewChanged { view: "V1".to_string() });
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use crate::activation::{ActivationError, ErrorKind, SkipReason};

#[derive(Debug, Clone, PartialEq, Serialize, strum::Display)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoaderEvent {
    SectionChanged {
        previous: Option<String>,
        current: String,
    },
    ViewChanged {
        view: String,
    },
    RecordsReset {
        cleared: Vec<String>,
    },
    Resolved {
        section: Option<String>,
        view: Option<String>,
        keys: Vec<String>,
    },
    Activated {
        key: String,
        section: String,
        view: Option<String>,
    },
    Skipped {
        key: String,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event: LoaderEvent,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ActivationError> for ErrorEvent {
    fn from(error: &ActivationError) -> Self {
        Self {
            key: error.key().to_string(),
            kind: error.kind(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Lagged behind by {count} events")]
    Lagged { count: u64 },
    #[error("Failed to receive event: {message}")]
    ReceiveFailed { message: String },
}

pub type EventResult<T> = Result<T, EventError>;

pub struct EventBus {
    event_sender: broadcast::Sender<Event>,
    error_sender: broadcast::Sender<ErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity.max(1));
        let (error_sender, _) = broadcast::channel(capacity.max(1));
        Self {
            event_sender,
            error_sender,
        }
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    /// Publishes to current subscribers; having none is not an error.
    pub fn publish(&self, event: LoaderEvent) {
        let event = Event {
            event,
            timestamp: Utc::now(),
        };
        if let Err(broadcast::error::SendError(event)) = self.event_sender.send(event) {
            trace!(event = %event.event, "no event subscribers");
        }
    }

    pub fn publish_error(&self, error: ErrorEvent) {
        if let Err(broadcast::error::SendError(error)) = self.error_sender.send(error) {
            trace!(key = %error.key, "no error subscribers");
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// On lag the receiver resubscribes and reports how many events were
    /// skipped; the next call continues with fresh events.
    pub async fn recv(&mut self) -> EventResult<Event> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

pub struct ErrorReceiver {
    receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }
}
