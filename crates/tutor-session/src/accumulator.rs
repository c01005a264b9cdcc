//! Folds stream events into the in-flight assistant message.

use serde_json::Value;
use tracing::{debug, warn};

use crate::frame::StreamEvent;
use crate::locale::Locale;
use crate::message::{Conversation, MessageId};

/// What a fold did, and whether the stream should keep being read.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The message was updated (or the event was a no-op); keep reading.
    Continue,
    /// A `done` event arrived, carrying the operation's structured result.
    Finished(Option<Value>),
    /// An `error` event arrived; the message now shows the failure.
    Failed(String),
    /// The target message is gone; the event was dropped.
    Stale,
    /// The accumulator had already terminated; the event was dropped.
    Ignored,
}

impl Step {
    /// Returns `true` if no further events should be folded.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Applies events to one target message through whole-message replacement.
#[derive(Debug, Clone)]
pub struct MessageAccumulator {
    target: MessageId,
    locale: Locale,
    terminated: bool,
}

impl MessageAccumulator {
    /// Creates an accumulator writing into the message `target`.
    #[must_use]
    pub fn new(target: MessageId, locale: &Locale) -> Self {
        Self {
            target,
            locale: locale.clone(),
            terminated: false,
        }
    }

    /// The message this accumulator writes into.
    #[must_use]
    pub const fn target(&self) -> MessageId {
        self.target
    }

    /// Returns `true` once an `error` or `done` has been folded.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Folds one event into the conversation.
    pub fn fold(&mut self, log: &mut Conversation, event: StreamEvent) -> Step {
        if self.terminated {
            debug!(target_id = %self.target, kind = event.kind(), "Ignoring event after termination");
            return Step::Ignored;
        }
        let Some(current) = log.get(self.target) else {
            warn!(target_id = %self.target, kind = event.kind(), "Dropping event for discarded message");
            return Step::Stale;
        };
        let mut next = current.clone();

        let step = match event {
            StreamEvent::Status { status, message } => {
                debug!(target_id = %self.target, %status, "Status update");
                next.status = Some(message.unwrap_or(status));
                Step::Continue
            }
            StreamEvent::Content { delta } => {
                if delta.is_empty() {
                    return Step::Continue;
                }
                next.content.push_str(&delta);
                next.pending = false;
                next.status = None;
                Step::Continue
            }
            StreamEvent::Error { message } => {
                warn!(target_id = %self.target, error = %message, "Backend reported an error");
                next.content = self.locale.failure(&message);
                next.pending = false;
                next.status = None;
                self.terminated = true;
                Step::Failed(message)
            }
            StreamEvent::Done { data } => {
                debug!(target_id = %self.target, has_data = data.is_some(), "Stream done");
                next.pending = false;
                next.status = None;
                self.terminated = true;
                Step::Finished(data)
            }
        };

        log.replace(next);
        step
    }

    /// Terminates the message with `content` after a failure outside the
    /// stream (transport error, premature end).
    pub fn abort(&mut self, log: &mut Conversation, content: String) -> Step {
        if self.terminated {
            return Step::Ignored;
        }
        self.terminated = true;
        let Some(current) = log.get(self.target) else {
            return Step::Stale;
        };
        let mut next = current.clone();
        next.content.clone_from(&content);
        next.pending = false;
        next.status = None;
        log.replace(next);
        Step::Failed(content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::locale::Language;
    use crate::message::{IdSource, Message};

    fn setup() -> (Conversation, MessageAccumulator) {
        let ids = IdSource::new();
        let mut log = Conversation::new();
        let id = ids.next_id();
        log.push(Message::placeholder(id));
        (log, MessageAccumulator::new(id, &Locale::new(Language::Chinese)))
    }

    fn content(delta: &str) -> StreamEvent {
        StreamEvent::Content {
            delta: delta.to_string(),
        }
    }

    #[test]
    fn test_status_keeps_pending() {
        let (mut log, mut acc) = setup();
        let step = acc.fold(
            &mut log,
            StreamEvent::Status {
                status: "analyzing".to_string(),
                message: Some("正在分析".to_string()),
            },
        );
        assert_eq!(step, Step::Continue);
        let msg = log.get(acc.target()).unwrap();
        assert!(msg.pending);
        assert_eq!(msg.status.as_deref(), Some("正在分析"));
    }

    #[test]
    fn test_content_appends_in_order() {
        let (mut log, mut acc) = setup();
        for delta in ["a", "", "b", "c"] {
            acc.fold(&mut log, content(delta));
        }
        let msg = log.get(acc.target()).unwrap();
        assert_eq!(msg.content, "abc");
        assert!(!msg.pending);
        assert!(msg.status.is_none());
    }

    #[test]
    fn test_empty_delta_is_noop() {
        let (mut log, mut acc) = setup();
        acc.fold(&mut log, content(""));
        assert!(log.get(acc.target()).unwrap().pending);
    }

    #[test]
    fn test_error_replaces_content_and_terminates() {
        let (mut log, mut acc) = setup();
        acc.fold(&mut log, content("partial"));
        let step = acc.fold(
            &mut log,
            StreamEvent::Error {
                message: "quota exceeded".to_string(),
            },
        );
        assert_eq!(step, Step::Failed("quota exceeded".to_string()));
        assert_eq!(log.get(acc.target()).unwrap().content, "抱歉，quota exceeded");

        assert_eq!(acc.fold(&mut log, content("late")), Step::Ignored);
        assert_eq!(log.get(acc.target()).unwrap().content, "抱歉，quota exceeded");
    }

    #[test]
    fn test_done_hands_over_data() {
        let (mut log, mut acc) = setup();
        let data = serde_json::json!({"mistakes": []});
        let step = acc.fold(
            &mut log,
            StreamEvent::Done {
                data: Some(data.clone()),
            },
        );
        assert_eq!(step, Step::Finished(Some(data)));
        assert!(step.is_final());
        assert!(!log.get(acc.target()).unwrap().pending);
    }

    #[test]
    fn test_fold_after_discard_is_stale() {
        let (mut log, mut acc) = setup();
        log.clear();
        assert_eq!(acc.fold(&mut log, content("x")), Step::Stale);
        assert!(log.is_empty());
    }

    #[test]
    fn test_abort_writes_failure_text() {
        let (mut log, mut acc) = setup();
        let step = acc.abort(&mut log, "connection reset".to_string());
        assert!(matches!(step, Step::Failed(_)));
        let msg = log.get(acc.target()).unwrap();
        assert_eq!(msg.content, "connection reset");
        assert!(!msg.pending);
        assert!(acc.is_terminated());
    }
}
