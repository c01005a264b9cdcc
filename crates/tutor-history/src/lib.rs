//! Tutor History
//!
//! Keeps the learner's past conversations and mistake analyses on disk and
//! turns them into something readable.
//!
//! # Types
//!
//! - [`ConversationRecord`] - A finished conversation
//! - [`AnalysisRecord`] - One mistake detection run
//! - [`HistoryStore`] - Bounded, newest-first lists persisted as JSON
//! - [`LearningSummary`] - Totals derived from analysis history
//!
//! # Generators
//!
//! - [`TranscriptGenerator`] - Render a conversation as Markdown
//! - [`SummaryGenerator`] - Render a learning summary as Markdown

mod markdown;
pub mod store;

pub use markdown::{SummaryGenerator, TranscriptGenerator};
pub use store::{HistoryStore, DEFAULT_MAX_ANALYSES, DEFAULT_MAX_CONVERSATIONS};

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tutor_session::{Conversation, DetectionReport, Message, Mistake};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or saving history.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history file exists but could not be parsed.
    #[error("history file '{path}' is corrupt: {message}\n\nSuggestion: Delete or move the file; a fresh history will be created on next save")]
    Corrupt {
        /// Path to the history file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Failed to serialize history to JSON.
    #[error("failed to serialize history: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write history files.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl HistoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

// ============================================================================
// Records
// ============================================================================

/// Characters of the first message kept as a conversation preview.
const PREVIEW_CHARS: usize = 50;

/// A saved conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Creation time in milliseconds since the Unix epoch.
    pub id: i64,
    /// When the conversation was saved.
    pub timestamp: DateTime<Utc>,
    /// Opening words of the conversation.
    pub preview: String,
    /// Every message, images reduced to their media type and preview handle.
    pub messages: Vec<Message>,
    /// Whether any message carried an image.
    pub has_image: bool,
}

impl ConversationRecord {
    /// Captures `conversation`, or `None` if it is empty.
    ///
    /// The id comes from `started`, so capturing the same conversation again
    /// later replaces the earlier record in a [`HistoryStore`].
    #[must_use]
    pub fn capture(
        conversation: &Conversation,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let first = conversation.messages().first()?;
        Some(Self {
            id: started.timestamp_millis(),
            timestamp: now,
            preview: preview_of(first),
            messages: conversation.messages().to_vec(),
            has_image: conversation.messages().iter().any(|m| m.image.is_some()),
        })
    }
}

/// A saved mistake detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Creation time in milliseconds since the Unix epoch.
    pub id: i64,
    /// When the detection finished.
    pub timestamp: DateTime<Utc>,
    /// Detected mistakes.
    pub mistakes: Vec<Mistake>,
    /// Streamed analysis text.
    pub analysis: String,
    /// Number of detected mistakes.
    pub mistake_count: usize,
    /// Preview handle of the analyzed page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AnalysisRecord {
    /// Captures a detection result.
    #[must_use]
    pub fn capture(report: &DetectionReport, now: DateTime<Utc>) -> Self {
        Self {
            id: now.timestamp_millis(),
            timestamp: now,
            mistakes: report.mistakes.clone(),
            analysis: report.analysis.clone(),
            mistake_count: report.mistakes.len(),
            image: Some(report.image.preview.clone()).filter(|p| !p.is_empty()),
        }
    }
}

fn preview_of(message: &Message) -> String {
    let content = message.content.trim();
    if content.is_empty() {
        return message
            .image
            .as_ref()
            .map_or_else(String::new, |image| image.preview.clone());
    }
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

// ============================================================================
// Learning Summary
// ============================================================================

/// Mistakes found on one day's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatedCount {
    /// Day of the analysis (UTC).
    pub date: NaiveDate,
    /// Mistakes detected.
    pub mistakes: usize,
}

/// Totals derived from analysis history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSummary {
    /// Number of recorded analyses.
    pub total_analyses: usize,
    /// Mistakes detected across all analyses.
    pub total_mistakes: usize,
    /// Whole days since the oldest analysis, at least 1 once anything is
    /// recorded.
    pub span_days: i64,
    /// Recent analyses that found mistakes, newest first.
    pub recent: Vec<DatedCount>,
}

impl LearningSummary {
    /// Returns `true` if no analysis has been recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_analyses == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use tutor_session::{IdSource, ImageRef};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_capture_empty_conversation() {
        assert!(ConversationRecord::capture(&Conversation::new(), at(0), at(0)).is_none());
    }

    #[test]
    fn test_capture_truncates_preview() {
        let ids = IdSource::new();
        let mut conversation = Conversation::new();
        conversation.push(Message::user(ids.next_id(), "一".repeat(60), None));
        conversation.push(Message::assistant(ids.next_id(), "ok"));

        let record = ConversationRecord::capture(&conversation, at(1_700_000_000), at(1_700_000_060)).unwrap();
        assert_eq!(record.id, 1_700_000_000_000);
        assert_eq!(record.timestamp, at(1_700_000_060));
        assert_eq!(record.preview, format!("{}...", "一".repeat(50)));
        assert_eq!(record.messages.len(), 2);
        assert!(!record.has_image);
    }

    #[test]
    fn test_capture_image_only_preview() {
        let ids = IdSource::new();
        let mut conversation = Conversation::new();
        let image = ImageRef::new(vec![1], "image/png", "page.png");
        conversation.push(Message::user(ids.next_id(), "", Some(image)));

        let record = ConversationRecord::capture(&conversation, at(0), at(0)).unwrap();
        assert_eq!(record.preview, "page.png");
        assert!(record.has_image);
    }

    #[test]
    fn test_analysis_record_counts_mistakes() {
        let report = DetectionReport {
            mistakes: vec![Mistake::numbered("3"), Mistake::numbered("7")],
            analysis: "计算题失分".to_string(),
            image: ImageRef::new(vec![1], "image/jpeg", ""),
        };
        let record = AnalysisRecord::capture(&report, at(0));
        assert_eq!(record.mistake_count, 2);
        assert!(record.image.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mistakeCount"], 2);
        assert_eq!(json["mistakes"][0]["question_no"], "3");
    }

    #[test]
    fn test_corrupt_error_has_suggestion() {
        let err = HistoryError::Corrupt {
            path: PathBuf::from("history.json"),
            message: "expected value".to_string(),
        };
        assert!(err.to_string().contains("Suggestion:"));
    }
}
