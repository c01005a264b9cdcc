//! Configuration for the tutor session engine.
//!
//! Settings are read from `tutor.json` (camelCase keys, every field optional)
//! and validated before a session is built.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotation::DEFAULT_MIN_BOX_SIZE;
use crate::error::{Result, TutorError};
use crate::image::DEFAULT_MAX_IMAGE_BYTES;
use crate::locale::{CommandVocabulary, Language, Locale, MatchRule};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default backend base URL.
fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Default upload ceiling in bytes.
const fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

/// Default minimum annotation box size in percent.
const fn default_min_box_size() -> f64 {
    DEFAULT_MIN_BOX_SIZE
}

/// Default connect timeout in seconds.
const fn default_connect_timeout_secs() -> u64 {
    30
}

/// Default gap allowed between two reads of a response body, in seconds.
const fn default_read_timeout_secs() -> u64 {
    120
}

/// Default per-subscriber event buffer.
const fn default_event_capacity() -> usize {
    256
}

/// Default history file path.
fn default_history_file() -> String {
    ".tutor/history.json".to_string()
}

/// Default number of conversations kept.
const fn default_max_conversations() -> usize {
    20
}

/// Default number of analyses kept.
const fn default_max_analyses() -> usize {
    50
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the tutoring backend.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Display language and default command vocabulary.
    #[serde(default)]
    pub language: Language,

    /// Largest accepted image upload in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Boxes must exceed this width and height (percent) to be kept.
    #[serde(default = "default_min_box_size")]
    pub min_box_size: f64,

    /// Timeout for establishing a backend connection, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Longest wait for the next bytes of a response, in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Events buffered per subscriber before it lags.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Overrides for the command vocabulary.
    #[serde(default)]
    pub commands: CommandOverrides,

    /// History persistence settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            language: Language::default(),
            max_image_bytes: default_max_image_bytes(),
            min_box_size: default_min_box_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            event_capacity: default_event_capacity(),
            commands: CommandOverrides::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Config {
    /// Loads `tutor.json` from the current working directory, or defaults.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `tutor.json` from `dir`, or defaults.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from `path`.
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is an error.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(TutorError::config_validation(
                format!("apiBaseUrl '{}' is not an http(s) URL", self.api_base_url),
                "Set apiBaseUrl to something like http://localhost:8000 in your tutor.json",
            ));
        }

        if self.max_image_bytes == 0 {
            return Err(TutorError::config_validation(
                "maxImageBytes must be greater than 0",
                "Set maxImageBytes to at least 1 in your tutor.json (default 10485760)",
            ));
        }

        if !(self.min_box_size > 0.0 && self.min_box_size < 100.0) {
            return Err(TutorError::config_validation(
                "minBoxSize must be between 0 and 100 (exclusive)",
                "Set minBoxSize to a percentage such as 2 in your tutor.json",
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "connectTimeoutSecs must be greater than 0",
                "Set connectTimeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        if self.read_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "readTimeoutSecs must be greater than 0",
                "Set readTimeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        if self.event_capacity == 0 {
            return Err(TutorError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your tutor.json",
            ));
        }

        if self.history.file.trim().is_empty() {
            return Err(TutorError::config_validation(
                "history.file must not be empty",
                "Provide a history file path in your tutor.json",
            ));
        }

        if self.history.max_conversations == 0 || self.history.max_analyses == 0 {
            return Err(TutorError::config_validation(
                "history.maxConversations and history.maxAnalyses must be greater than 0",
                "Set both limits to at least 1 in your tutor.json",
            ));
        }

        Ok(())
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Builds the locale: the language defaults with overrides applied.
    #[must_use]
    pub fn locale(&self) -> Locale {
        let commands = self
            .commands
            .apply(CommandVocabulary::for_language(self.language));
        Locale::new(self.language).with_commands(commands)
    }
}

/// Optional replacements for individual command lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOverrides {
    /// Replaces the select-all tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_all: Option<Vec<String>>,
    /// Replaces the redetect tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redetect: Option<Vec<String>>,
    /// Replaces the skip tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<Vec<String>>,
    /// Replaces the exit tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<Vec<String>>,
    /// Replaces the skip/exit match rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_rule: Option<MatchRule>,
}

impl CommandOverrides {
    fn apply(&self, mut vocabulary: CommandVocabulary) -> CommandVocabulary {
        if let Some(tokens) = &self.select_all {
            vocabulary.select_all.clone_from(tokens);
        }
        if let Some(tokens) = &self.redetect {
            vocabulary.redetect.clone_from(tokens);
        }
        if let Some(tokens) = &self.skip {
            vocabulary.skip.clone_from(tokens);
        }
        if let Some(tokens) = &self.exit {
            vocabulary.exit.clone_from(tokens);
        }
        if let Some(rule) = self.match_rule {
            vocabulary.match_rule = rule;
        }
        vocabulary
    }
}

/// History persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// JSON file holding saved conversations and analyses.
    #[serde(default = "default_history_file")]
    pub file: String,

    /// Conversations kept, newest first.
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Analyses kept, newest first.
    #[serde(default = "default_max_analyses")]
    pub max_analyses: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: default_history_file(),
            max_conversations: default_max_conversations(),
            max_analyses: default_max_analyses(),
        }
    }
}
