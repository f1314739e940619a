//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks and never fails for lack of
//! listeners, so the control loop can report freely.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Sensor readings as they are ingested |
//! | [`Topic::MotionCommands`] | Applied and refused commands, clamp events |
//! | [`Topic::SafetyAlerts`] | Scheduler transitions (incl. Halted), dispatch alerts |
//! | [`Topic::Decisions`] | Accepted and rejected navigation decisions |

use strider_types::{Event, EventPayload, StriderError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    MotionCommands,
    SafetyAlerts,
    Decisions,
}

impl Topic {
    /// The topic a payload is routed to by [`EventBus::publish`].
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::Telemetry(_) => Topic::Telemetry,
            EventPayload::CommandApplied { .. }
            | EventPayload::CommandRefused { .. }
            | EventPayload::Clamped(_) => Topic::MotionCommands,
            EventPayload::StateTransition { .. } | EventPayload::DispatchAlert { .. } => {
                Topic::SafetyAlerts
            }
            EventPayload::DecisionAccepted { .. } | EventPayload::DecisionRejected(_) => {
                Topic::Decisions
            }
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    motion_commands: broadcast::Sender<Event>,
    safety_alerts: broadcast::Sender<Event>,
    decisions: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (motion_commands, _) = broadcast::channel(capacity);
        let (safety_alerts, _) = broadcast::channel(capacity);
        let (decisions, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            motion_commands,
            safety_alerts,
            decisions,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event;
    /// `Ok(0)` when nobody is listening, which is a normal condition.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StriderError> {
        let sender = self.topic_sender(topic);
        if sender.receiver_count() == 0 {
            return Ok(0);
        }
        sender
            .send(event)
            .or_else(|broadcast::error::SendError(_)| Ok(0))
    }

    /// Publish `event` on the topic its payload belongs to.
    pub fn publish(&self, event: Event) -> Result<usize, StriderError> {
        let topic = Topic::of(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::MotionCommands => &self.motion_commands,
            Topic::SafetyAlerts => &self.safety_alerts,
            Topic::Decisions => &self.decisions,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic, skipping over any that were
    /// dropped because this receiver fell behind.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Channel`] once every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, StriderError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StriderError::Channel(format!(
                        "topic {:?} closed",
                        self.topic
                    )));
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv].  `None` when no event is
    /// waiting or the channel is closed.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
