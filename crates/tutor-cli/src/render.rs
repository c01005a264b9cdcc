//! Turns session events into terminal output.
//!
//! Streamed answers are printed incrementally: each update prints only the
//! text added since the previous one. When a message is rewritten rather
//! than extended (a failure replacing partial output, a diagnosis report),
//! the whole new content is printed on a fresh line.

use std::collections::HashMap;
use std::fmt::Write;

use tutor_session::{Message, MessageId, Role, SessionEvent, SessionMode};

/// Stateful event renderer.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashMap<MessageId, String>,
    statuses: HashMap<MessageId, String>,
}

impl Renderer {
    /// Creates a renderer with nothing printed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text to print for `event`, if any.
    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::MessageAppended(message) => self.appended(message),
            SessionEvent::MessageUpdated(message) => self.updated(message),
            SessionEvent::MessageRemoved(message) => {
                self.printed.remove(&message.id);
                self.statuses.remove(&message.id);
                None
            }
            SessionEvent::ConversationCleared => {
                self.printed.clear();
                self.statuses.clear();
                Some("-- conversation cleared --\n".to_string())
            }
            SessionEvent::ModeChanged(change) if change.from == SessionMode::Streaming => {
                Some("\n".to_string())
            }
            SessionEvent::Notice(notice) => Some(format!("! {}\n", notice.message)),
            SessionEvent::ModeChanged(_) | SessionEvent::BusyChanged(_) => None,
        }
    }

    fn appended(&mut self, message: &Message) -> Option<String> {
        match message.role {
            Role::User => message
                .image
                .as_ref()
                .map(|image| format!("[image] {} ({} bytes)\n", image.preview, image.len())),
            Role::Assistant if message.pending => {
                self.printed.insert(message.id, String::new());
                Some("tutor> ".to_string())
            }
            Role::Assistant => {
                let mut out = format!("tutor> {}\n", message.content);
                for (idx, choice) in message.options.iter().enumerate() {
                    let _ = writeln!(out, "  [{}] {} - {}", idx + 1, choice.label, choice.description);
                }
                self.printed.insert(message.id, message.content.clone());
                Some(out)
            }
        }
    }

    fn updated(&mut self, message: &Message) -> Option<String> {
        if message.role != Role::Assistant {
            return None;
        }
        let printed = self.printed.get_mut(&message.id)?;

        if message.content.is_empty() {
            let status = message.status.as_ref()?;
            if self.statuses.get(&message.id) == Some(status) {
                return None;
            }
            self.statuses.insert(message.id, status.clone());
            return Some(format!("({status}) "));
        }

        if let Some(delta) = message.content.strip_prefix(printed.as_str()) {
            if delta.is_empty() {
                return None;
            }
            let delta = delta.to_string();
            printed.clone_from(&message.content);
            Some(delta)
        } else {
            printed.clone_from(&message.content);
            Some(format!("\n{}", message.content))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tutor_session::{Choice, IdSource};

    use super::*;

    fn streaming(ids: &IdSource) -> Message {
        Message::placeholder(ids.next_id())
    }

    #[test]
    fn test_streams_deltas() {
        let ids = IdSource::new();
        let mut renderer = Renderer::new();
        let mut message = streaming(&ids);

        assert_eq!(
            renderer.render(&SessionEvent::MessageAppended(message.clone())),
            Some("tutor> ".to_string())
        );

        message.status = Some("AI正在分析中...".to_string());
        assert_eq!(
            renderer.render(&SessionEvent::MessageUpdated(message.clone())),
            Some("(AI正在分析中...) ".to_string())
        );
        assert_eq!(renderer.render(&SessionEvent::MessageUpdated(message.clone())), None);

        message.status = None;
        message.pending = false;
        message.content = "x = ".to_string();
        assert_eq!(
            renderer.render(&SessionEvent::MessageUpdated(message.clone())),
            Some("x = ".to_string())
        );
        message.content.push('2');
        assert_eq!(
            renderer.render(&SessionEvent::MessageUpdated(message.clone())),
            Some("2".to_string())
        );
        assert_eq!(renderer.render(&SessionEvent::MessageUpdated(message)), None);
    }

    #[test]
    fn test_rewrite_prints_whole_message() {
        let ids = IdSource::new();
        let mut renderer = Renderer::new();
        let mut message = streaming(&ids);
        renderer.render(&SessionEvent::MessageAppended(message.clone()));

        message.pending = false;
        message.content = "部分".to_string();
        renderer.render(&SessionEvent::MessageUpdated(message.clone()));
        message.content = "抱歉，额度不足".to_string();
        assert_eq!(
            renderer.render(&SessionEvent::MessageUpdated(message)),
            Some("\n抱歉，额度不足".to_string())
        );
    }

    #[test]
    fn test_local_reply_lists_options() {
        let ids = IdSource::new();
        let mut renderer = Renderer::new();
        let message = Message::assistant(ids.next_id(), "检测到 1 道错题")
            .with_options(vec![Choice::new("全部引导", "对所有错题逐一引导")]);

        let out = renderer
            .render(&SessionEvent::MessageAppended(message))
            .unwrap();
        assert_eq!(out, "tutor> 检测到 1 道错题\n  [1] 全部引导 - 对所有错题逐一引导\n");
    }

    #[test]
    fn test_user_text_not_echoed() {
        let ids = IdSource::new();
        let mut renderer = Renderer::new();
        let message = Message::user(ids.next_id(), "hello", None);
        assert_eq!(renderer.render(&SessionEvent::MessageAppended(message)), None);
    }

    #[test]
    fn test_stream_end_breaks_line() {
        let mut renderer = Renderer::new();
        let event = SessionEvent::mode_changed(SessionMode::Streaming, SessionMode::Idle);
        assert_eq!(renderer.render(&event), Some("\n".to_string()));
        let event = SessionEvent::mode_changed(SessionMode::Idle, SessionMode::Streaming);
        assert_eq!(renderer.render(&event), None);
    }
}
