//! Session events and broadcasting.
//!
//! Every change a presentation layer needs to render is published as a
//! [`SessionEvent`]. Events serialize as `{"event": ..., "payload": ...}`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::message::Message;
use crate::session::SessionMode;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `mode_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChangedPayload {
    /// Mode before the transition.
    pub from: SessionMode,
    /// Mode after the transition.
    pub to: SessionMode,
}

/// Payload for the `busy_changed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyChangedPayload {
    /// Requests in flight after the change.
    pub pending: usize,
}

/// Payload for the `notice` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePayload {
    /// Text for the learner that is not part of the conversation.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Observable session changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was added to the conversation.
    MessageAppended(Message),
    /// A message was replaced; carries the full new value.
    MessageUpdated(Message),
    /// A message was removed.
    MessageRemoved(Message),
    /// The conversation was cleared.
    ConversationCleared,
    /// The session mode changed.
    ModeChanged(ModeChangedPayload),
    /// The in-flight request count changed.
    BusyChanged(BusyChangedPayload),
    /// Out-of-band information (validation failures, ignored input).
    Notice(NoticePayload),
}

impl SessionEvent {
    /// Creates a `ModeChanged` event.
    #[must_use]
    pub const fn mode_changed(from: SessionMode, to: SessionMode) -> Self {
        Self::ModeChanged(ModeChangedPayload { from, to })
    }

    /// Creates a `BusyChanged` event.
    #[must_use]
    pub const fn busy_changed(pending: usize) -> Self {
        Self::BusyChanged(BusyChangedPayload { pending })
    }

    /// Creates a `Notice` event.
    #[must_use]
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice(NoticePayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::MessageAppended(_) => "message_appended",
            Self::MessageUpdated(_) => "message_updated",
            Self::MessageRemoved(_) => "message_removed",
            Self::ConversationCleared => "conversation_cleared",
            Self::ModeChanged(_) => "mode_changed",
            Self::BusyChanged(_) => "busy_changed",
            Self::Notice(_) => "notice",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans session events out to every subscriber.
///
/// Events are not retained for subscribers that join later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls more than `capacity` events behind receives a
    /// `Lagged` error and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning the number of receivers.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
