//! Socratic walk-through of confirmed mistakes, one at a time.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TutorError};
use crate::locale::Locale;
use crate::message::{Diagnosis, HistoryEntry, Mistake, Role};
use crate::transport::GuideRequest;

/// Where the walk-through stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceState {
    /// `start` has not been called.
    NotStarted,
    /// Working on the mistake at `index`.
    PerMistake {
        /// Position in the mistake list.
        index: usize,
    },
    /// Every mistake has been covered.
    Completed,
    /// The learner left early.
    Exited,
}

impl std::fmt::Display for GuidanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::PerMistake { index } => write!(f, "guiding mistake {}", index + 1),
            Self::Completed => write!(f, "completed"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Result of submitting learner text during guidance.
#[derive(Debug, Clone, PartialEq)]
pub enum GuidanceStep {
    /// The learner left guidance; `reply` is the local farewell turn.
    Exited {
        /// Text to show.
        reply: String,
    },
    /// Moved to the next mistake; `reply` introduces it.
    Advanced {
        /// Text to show.
        reply: String,
    },
    /// No mistakes remain.
    Completed {
        /// Closing summary.
        summary: String,
        /// Number of mistakes in this walk-through.
        total: usize,
    },
    /// Forward the learner's text to the guide operation.
    Forward(GuideRequest),
}

/// Per-mistake guidance state machine.
#[derive(Debug, Clone)]
pub struct GuidanceSession {
    locale: Locale,
    mistakes: Vec<Mistake>,
    state: GuidanceState,
    question: Option<String>,
    diagnosis: Option<Diagnosis>,
    transcript: Vec<HistoryEntry>,
}

impl GuidanceSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new(locale: &Locale) -> Self {
        Self {
            locale: locale.clone(),
            mistakes: Vec::new(),
            state: GuidanceState::NotStarted,
            question: None,
            diagnosis: None,
            transcript: Vec::new(),
        }
    }

    /// Begins guidance over `mistakes` and returns the introductory turn.
    pub fn start(&mut self, mistakes: Vec<Mistake>) -> Result<String> {
        if mistakes.is_empty() {
            return Err(TutorError::invalid_state(
                "start guidance without mistakes",
                self.state,
            ));
        }
        let intro = self.locale.guidance_intro(&mistakes);
        info!(count = mistakes.len(), "Guidance started");
        self.mistakes = mistakes;
        self.state = GuidanceState::PerMistake { index: 0 };
        self.question = None;
        self.diagnosis = None;
        self.transcript.clear();
        Ok(intro)
    }

    /// Routes one learner turn.
    pub fn submit(&mut self, text: &str) -> Result<GuidanceStep> {
        let GuidanceState::PerMistake { index } = self.state else {
            return Err(TutorError::invalid_state("submit guidance reply", self.state));
        };
        let commands = &self.locale.commands;

        if commands.is_exit(text) {
            info!(index, "Guidance exited");
            self.state = GuidanceState::Exited;
            return Ok(GuidanceStep::Exited {
                reply: self.locale.guidance_exited().to_string(),
            });
        }

        if commands.is_skip(text) {
            let next = index + 1;
            self.question = None;
            self.diagnosis = None;
            if next >= self.mistakes.len() {
                let total = self.mistakes.len();
                info!(total, "Guidance completed");
                self.state = GuidanceState::Completed;
                return Ok(GuidanceStep::Completed {
                    summary: self.locale.guidance_complete(total),
                    total,
                });
            }
            debug!(from = index, to = next, "Advancing to next mistake");
            self.state = GuidanceState::PerMistake { index: next };
            let reply = self
                .locale
                .guidance_next(&self.mistakes[index], &self.mistakes[next]);
            return Ok(GuidanceStep::Advanced { reply });
        }

        Ok(GuidanceStep::Forward(self.request(Some(text.to_string()))))
    }

    /// Appends a completed learner/backend exchange to the transcript.
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.transcript.push(HistoryEntry::new(Role::User, user));
        self.transcript
            .push(HistoryEntry::new(Role::Assistant, assistant));
    }

    /// Sets the diagnosis sent with subsequent guide requests.
    pub fn attach_diagnosis(&mut self, diagnosis: Diagnosis) {
        self.diagnosis = Some(diagnosis);
    }

    /// Sets the question text sent with subsequent guide requests.
    pub fn set_question(&mut self, question: impl Into<String>) {
        self.question = Some(question.into());
    }

    /// Builds the request for the first Socratic prompt on the current
    /// mistake: no learner response and an empty transcript.
    pub fn opening_request(&self) -> Result<GuideRequest> {
        if !self.is_active() {
            return Err(TutorError::invalid_state("open guidance", self.state));
        }
        let mut request = self.request(None);
        request.conversation_history.clear();
        Ok(request)
    }

    fn request(&self, student_response: Option<String>) -> GuideRequest {
        let question = self.question.clone().unwrap_or_else(|| {
            self.current()
                .map(|m| self.locale.guidance_question(m))
                .unwrap_or_default()
        });
        let diagnosis = self.diagnosis.as_ref().map_or_else(
            || self.locale.undiagnosed().to_string(),
            Diagnosis::summary_line,
        );
        GuideRequest {
            question,
            diagnosis,
            student_response,
            conversation_history: self.transcript.clone(),
        }
    }

    /// The mistake being worked on.
    #[must_use]
    pub fn current(&self) -> Option<&Mistake> {
        match self.state {
            GuidanceState::PerMistake { index } => self.mistakes.get(index),
            _ => None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> GuidanceState {
        self.state
    }

    /// Returns `true` while a mistake is being worked on.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, GuidanceState::PerMistake { .. })
    }

    /// Mistakes in this walk-through.
    #[must_use]
    pub fn mistakes(&self) -> &[Mistake] {
        &self.mistakes
    }

    /// Exchanges recorded since `start`.
    #[must_use]
    pub fn transcript(&self) -> &[HistoryEntry] {
        &self.transcript
    }
}
