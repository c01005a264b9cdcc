//! Bounded history lists persisted as one JSON file.
//!
//! Both lists are kept newest first. Pushing beyond the limit evicts the
//! oldest entry. Saves go through a temp file and a rename so a crash never
//! leaves a half-written file behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    AnalysisRecord, ConversationRecord, DatedCount, HistoryError, LearningSummary, Result,
};

/// Default number of conversations kept.
pub const DEFAULT_MAX_CONVERSATIONS: usize = 20;

/// Default number of analyses kept.
pub const DEFAULT_MAX_ANALYSES: usize = 50;

/// Analyses listed in the summary.
const RECENT_ANALYSES: usize = 5;

/// Current on-disk format version.
const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    conversations: Vec<ConversationRecord>,
    #[serde(default)]
    analyses: Vec<AnalysisRecord>,
}

const fn default_version() -> u32 {
    HISTORY_VERSION
}

/// Conversation and analysis history bound to a file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    max_conversations: usize,
    max_analyses: usize,
    conversations: Vec<ConversationRecord>,
    analyses: Vec<AnalysisRecord>,
}

impl HistoryStore {
    /// Creates an empty store that will save to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_conversations: usize, max_analyses: usize) -> Self {
        Self {
            path: path.into(),
            max_conversations: max_conversations.max(1),
            max_analyses: max_analyses.max(1),
            conversations: Vec::new(),
            analyses: Vec::new(),
        }
    }

    /// Opens the store at `path`.
    ///
    /// A missing file yields an empty store. A file that cannot be parsed is
    /// an error; entries beyond the limits are dropped.
    pub fn load(path: impl Into<PathBuf>, max_conversations: usize, max_analyses: usize) -> Result<Self> {
        let mut store = Self::new(path, max_conversations, max_analyses);
        if !store.path.exists() {
            debug!(path = %store.path.display(), "No history file, starting empty");
            return Ok(store);
        }

        let contents =
            fs::read_to_string(&store.path).map_err(|e| HistoryError::io(&store.path, e))?;
        let file: HistoryFile =
            serde_json::from_str(&contents).map_err(|e| HistoryError::Corrupt {
                path: store.path.clone(),
                message: e.to_string(),
            })?;

        store.conversations = file.conversations;
        store.analyses = file.analyses;
        store.conversations.truncate(store.max_conversations);
        store.analyses.truncate(store.max_analyses);
        info!(
            path = %store.path.display(),
            version = file.version,
            conversations = store.conversations.len(),
            analyses = store.analyses.len(),
            "History loaded"
        );
        Ok(store)
    }

    /// Writes the store to its file atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }

        let file = HistoryFile {
            version: HISTORY_VERSION,
            conversations: self.conversations.clone(),
            analyses: self.analyses.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp_file = File::create(&tmp_path).map_err(|e| HistoryError::io(&tmp_path, e))?;
        tmp_file
            .write_all(json.as_bytes())
            .map_err(|e| HistoryError::io(&tmp_path, e))?;
        tmp_file
            .sync_all()
            .map_err(|e| HistoryError::io(&tmp_path, e))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).map_err(|e| HistoryError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "History saved");
        Ok(())
    }

    /// Adds a conversation at the front, evicting the oldest past the limit.
    ///
    /// A record with the same id is replaced and moves to the front.
    pub fn record_conversation(&mut self, record: ConversationRecord) {
        self.conversations.retain(|c| c.id != record.id);
        self.conversations.insert(0, record);
        self.conversations.truncate(self.max_conversations);
    }

    /// Adds an analysis at the front, evicting the oldest past the limit.
    pub fn record_analysis(&mut self, record: AnalysisRecord) {
        self.analyses.insert(0, record);
        self.analyses.truncate(self.max_analyses);
    }

    /// Removes the analysis with `id`. Returns `true` if one was removed.
    pub fn remove_analysis(&mut self, id: i64) -> bool {
        let before = self.analyses.len();
        self.analyses.retain(|a| a.id != id);
        self.analyses.len() != before
    }

    /// Drops every entry. The file is untouched until the next save.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.analyses.clear();
    }

    /// Saved conversations, newest first.
    #[must_use]
    pub fn conversations(&self) -> &[ConversationRecord] {
        &self.conversations
    }

    /// Saved analyses, newest first.
    #[must_use]
    pub fn analyses(&self) -> &[AnalysisRecord] {
        &self.analyses
    }

    /// The file the store saves to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Derives learning totals from analysis history as of `now`.
    #[must_use]
    pub fn summary(&self, now: DateTime<Utc>) -> LearningSummary {
        let Some(oldest) = self.analyses.last() else {
            return LearningSummary::default();
        };

        let elapsed = now.signed_duration_since(oldest.timestamp);
        let mut span_days = elapsed.num_days();
        if elapsed > chrono::Duration::days(span_days) {
            span_days += 1;
        }

        LearningSummary {
            total_analyses: self.analyses.len(),
            total_mistakes: self.analyses.iter().map(|a| a.mistake_count).sum(),
            span_days: span_days.max(1),
            recent: self
                .analyses
                .iter()
                .take(RECENT_ANALYSES)
                .filter(|a| a.mistake_count > 0)
                .map(|a| DatedCount {
                    date: a.timestamp.date_naive(),
                    mistakes: a.mistake_count,
                })
                .collect(),
        }
    }
}
