//! Message Bus for notifications
//!
//! The MessageBus provides a pub/sub pattern so the store, poller, executor
//! and sequencer can report progress without knowing who is listening. One
//! bus is created per application instance and handed to each component;
//! there is no process-wide registry.
//!
//! Publishing never waits on a subscriber: each subscriber gets a bounded
//! channel, and an event that does not fit (or whose receiver was dropped)
//! is discarded for that subscriber only.

use sdk::types::{ProjectStatus, StepId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Event types that can be published on the message bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    StepStarted,
    StepChunk,
    StepCompleted,
    StepFailed,
    Progress,
    ProjectMerged,
    PollStopped,
    Notice,
    /// Subscribe to all event types
    All,
}

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A step request was issued
    StepStarted { project: String, step: StepId },
    /// A streamed chunk was appended to a step's content
    StepChunk {
        project: String,
        step: StepId,
        chunk: String,
    },
    /// A step finished successfully
    StepCompleted { project: String, step: StepId },
    /// A step failed and the project was marked failed
    StepFailed {
        project: String,
        step: StepId,
        error: String,
    },
    /// Run-all progress as a percentage
    Progress {
        project: String,
        percent: u8,
        step: Option<StepId>,
    },
    /// A canonical snapshot was merged into the store
    ProjectMerged {
        project: String,
        status: ProjectStatus,
    },
    /// A poll loop ended
    PollStopped { scope: String, reason: String },
    /// Toast-style message for the user
    Notice { level: NoticeLevel, message: String },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::StepStarted { .. } => EventType::StepStarted,
            Event::StepChunk { .. } => EventType::StepChunk,
            Event::StepCompleted { .. } => EventType::StepCompleted,
            Event::StepFailed { .. } => EventType::StepFailed,
            Event::Progress { .. } => EventType::Progress,
            Event::ProjectMerged { .. } => EventType::ProjectMerged,
            Event::PollStopped { .. } => EventType::PollStopped,
            Event::Notice { .. } => EventType::Notice,
        }
    }

    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Event::Notice {
            level,
            message: message.into(),
        }
    }
}

/// Message bus for pub/sub communication between components
///
/// Cloning a `MessageBus` yields another handle to the same subscriber set.
#[derive(Clone)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    /// Create a new MessageBus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Drop every subscription to `event_type`.
    ///
    /// Receivers still get the events already queued for them, then see
    /// the channel closed.
    pub async fn unsubscribe(&self, event_type: EventType) {
        self.channels.lock().await.remove(&event_type);
    }

    /// Publish an event to all subscribers of its type and of `All`.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Dropping {:?} event for a full subscriber", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscribers across all event types
    pub async fn subscriber_count(&self) -> usize {
        let channels = self.channels.lock().await;
        channels.values().map(|subs| subs.len()).sum()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
