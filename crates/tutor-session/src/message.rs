//! Conversation data model.
//!
//! Messages are owned by the [`Conversation`] log and addressed by
//! [`MessageId`]. Every mutation goes through [`Conversation::replace`], which
//! swaps a whole message at once, so a reader never observes a half-updated
//! entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Identity
// ============================================================================

/// Identifier of a message or an annotation box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Monotonic id source shared by everything a session creates.
///
/// Cloning yields a handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct IdSource {
    next: Arc<AtomicU64>,
}

impl IdSource {
    /// Creates a source whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a source whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    /// Returns a fresh id, strictly greater than every id handed out before.
    pub fn next_id(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Images
// ============================================================================

/// An uploaded image: opaque bytes plus media type and a preview handle.
///
/// Immutable once created. The byte buffer is shared, so clones are cheap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Raw image bytes.
    #[serde(skip)]
    bytes: Arc<Vec<u8>>,

    /// Media type, e.g. `image/png`.
    pub mime_type: String,

    /// Handle the presentation layer uses to show a preview (a file path or
    /// data URL).
    pub preview: String,
}

impl ImageRef {
    /// Creates an image reference without validating it.
    ///
    /// Use [`crate::image::load_image`] or [`crate::image::validate_image`] at
    /// the upload boundary.
    #[must_use]
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, preview: impl Into<String>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            mime_type: mime_type.into(),
            preview: preview.into(),
        }
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the payload as standard base64, the form the backend expects.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(self.bytes.as_slice())
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner.
    User,
    /// The tutoring backend.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A selectable reply offered alongside an interactive message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Short label.
    pub label: String,
    /// What picking this choice does.
    pub description: String,
}

impl Choice {
    /// Creates a new choice.
    #[must_use]
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identity, used to target in-place updates while streaming.
    pub id: MessageId,

    /// Author.
    pub role: Role,

    /// Text content. Append-only while streaming.
    pub content: String,

    /// Attached image, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,

    /// `true` until the first real content arrives.
    pub pending: bool,

    /// `true` if the message expects a structured reply.
    pub interactive: bool,

    /// Choices offered with an interactive message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Choice>,

    /// Transient progress text shown while nothing else has arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Message {
    /// Creates a user message.
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>, image: Option<ImageRef>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            image,
            pending: false,
            interactive: false,
            options: Vec::new(),
            status: None,
        }
    }

    /// Creates a finished assistant message.
    #[must_use]
    pub fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            image: None,
            pending: false,
            interactive: false,
            options: Vec::new(),
            status: None,
        }
    }

    /// Creates an empty, pending assistant message to be filled by a stream.
    #[must_use]
    pub fn placeholder(id: MessageId) -> Self {
        Self {
            pending: true,
            ..Self::assistant(id, String::new())
        }
    }

    /// Turns this message into an interactive one offering `options`.
    #[must_use]
    pub fn with_options(mut self, options: Vec<Choice>) -> Self {
        self.interactive = true;
        self.options = options;
        self
    }

    /// Returns `true` for a user message that carries only an image.
    #[must_use]
    pub fn is_image_only(&self) -> bool {
        self.role == Role::User && self.image.is_some() && self.content.trim().is_empty()
    }
}

/// The `{role, content}` projection sent to the backend as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

// ============================================================================
// Conversation log
// ============================================================================

/// Ordered log of messages, the only owner of [`Message`] values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Appends a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replaces the message with the same id as `message`.
    ///
    /// Returns `false` (and drops `message`) if no such message exists, which
    /// is how late updates aimed at a discarded message become no-ops.
    pub fn replace(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// Removes and returns the message with the given id.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Returns the message with the given id.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Returns the last message.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns all messages in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the conversation has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the pending assistant message, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.pending)
    }

    /// Finalizes or discards any pending placeholder.
    ///
    /// A placeholder that received content keeps it and is marked done; an
    /// empty one is removed. Returns the ids that were touched.
    pub fn settle_pending(&mut self) -> Vec<MessageId> {
        let mut touched = Vec::new();
        self.messages.retain_mut(|m| {
            if !m.pending {
                return true;
            }
            touched.push(m.id);
            m.pending = false;
            m.status = None;
            !m.content.is_empty()
        });
        touched
    }

    /// Projects the log into the `{role, content}` history the backend takes.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages.iter().map(HistoryEntry::from).collect()
    }

    /// Removes every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

// ============================================================================
// Detection and diagnosis payloads
// ============================================================================

/// A mistake reported by the detection operation.
///
/// Only the question number is interpreted; every other field the backend
/// sent is kept verbatim in `meta`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mistake {
    /// Question number as printed on the page, if the backend found one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_no: Option<String>,

    /// Remaining detection metadata.
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl Mistake {
    /// Creates a mistake with the given question number and no metadata.
    #[must_use]
    pub fn numbered(question_no: impl Into<String>) -> Self {
        Self {
            question_no: Some(question_no.into()),
            meta: Map::new(),
        }
    }

    /// Returns the question number, or `?` when unknown.
    #[must_use]
    pub fn label(&self) -> &str {
        self.question_no.as_deref().unwrap_or("?")
    }
}

impl<'de> Deserialize<'de> for Mistake {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut meta = Map::deserialize(deserializer)?;
        let raw = meta
            .remove("question_no")
            .or_else(|| meta.remove("questionNo"));
        let question_no = match raw {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "invalid question_no '{other}': expected a string or a number"
                )));
            }
        };
        Ok(Self { question_no, meta })
    }
}

/// Result of the diagnose operation for one mistake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Core knowledge point the question tests.
    #[serde(default)]
    pub knowledge_point: String,

    /// Kind of error (conceptual, method, calculation).
    #[serde(default)]
    pub error_type: String,

    /// One-sentence description of the learner's problem.
    #[serde(default, rename = "problem_description", alias = "description")]
    pub description: String,

    /// Longer free-form analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Diagnosis {
    /// The diagnosis line sent with guide requests.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!("{} - {}", self.knowledge_point, self.description)
    }
}
