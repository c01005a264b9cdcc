//! Session orchestration.
//!
//! A [`Session`] owns the conversation, the mode, the detected mistakes, the
//! guidance walk-through and the annotation engine. Learner input is routed
//! by mode:
//!
//! | Mode | Input | Effect |
//! |---|---|---|
//! | `Idle` | text and/or working image | solve |
//! | `Idle` | empty, last message is an image | detect mistakes |
//! | `AwaitingConfirmation` | all / numbers | start guidance |
//! | `AwaitingConfirmation` | redetect | clear everything |
//! | `AwaitingConfirmation` | anything else | solve, back to `Idle` |
//! | `GuidanceActive` | skip / exit | local reply, no request |
//! | `GuidanceActive` | anything else | guide |
//!
//! Every backend call goes through one wrapper that holds a
//! [`PendingRequests`] guard for the duration of the call. If the caller
//! drops an operation mid-stream, the guard releases the counter and the next
//! operation settles the leftover placeholder and restores the mode the
//! stream would have returned to.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::accumulator::{MessageAccumulator, Step};
use crate::annotation::{AnnotationEngine, BoundingBox};
use crate::config::Config;
use crate::confirmation::{self, Confirmation};
use crate::error::{Result, TutorError};
use crate::events::{EventBroadcaster, SessionEvent};
use crate::frame::{self, StreamEvent};
use crate::guidance::{GuidanceSession, GuidanceState, GuidanceStep};
use crate::image::{load_image, validate_image};
use crate::locale::Locale;
use crate::message::{
    Conversation, Diagnosis, HistoryEntry, IdSource, ImageRef, Message, MessageId, Mistake,
};
use crate::requests::PendingRequests;
use crate::transport::{
    AnalyzeRequest, AnalyzeResponse, BackendRequest, ChatResponse, DetectRequest,
    DiagnoseRequest, SolveRequest, Transport,
};

// ============================================================================
// Mode and outcomes
// ============================================================================

/// Interaction mode of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Ordinary question answering.
    #[default]
    Idle,
    /// A backend stream is being folded into the conversation.
    Streaming,
    /// Waiting for the learner to confirm detected mistakes.
    AwaitingConfirmation,
    /// Walking through confirmed mistakes.
    GuidanceActive,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::GuidanceActive => write!(f, "guidance_active"),
        }
    }
}

/// What an operation did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A solve stream completed.
    Answered,
    /// Detection found mistakes; the learner must confirm them.
    AwaitingConfirmation {
        /// Number of detected mistakes.
        count: usize,
    },
    /// Detection completed without finding anything.
    NoMistakesFound,
    /// Guidance began over the selected mistakes.
    GuidanceStarted {
        /// Number of mistakes selected.
        count: usize,
    },
    /// A guide stream completed.
    GuidanceReply,
    /// Guidance moved on to the next mistake.
    GuidanceAdvanced,
    /// Guidance covered every mistake.
    GuidanceCompleted {
        /// Number of mistakes covered.
        total: usize,
    },
    /// The learner left guidance.
    GuidanceExited,
    /// Detection results were discarded and the conversation cleared.
    Reset,
    /// A diagnosis was produced and guidance opened on it.
    Diagnosed(Diagnosis),
    /// The backend call failed; the failure text is in the conversation.
    Failed {
        /// Failure description.
        message: String,
    },
    /// The input did not apply in the current state and was dropped.
    Ignored,
}

/// Result of the most recent mistake detection, for history keeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    /// Detected mistakes (possibly empty).
    pub mistakes: Vec<Mistake>,
    /// Streamed analysis text.
    pub analysis: String,
    /// The analyzed page.
    pub image: ImageRef,
}

/// A consistent copy of the observable session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Current mode.
    pub mode: SessionMode,
    /// All messages in order.
    pub messages: Vec<Message>,
    /// Mistakes from the last detection.
    pub mistakes: Vec<Mistake>,
    /// Whether any request is in flight.
    pub busy: bool,
    /// Guidance progress.
    pub guidance: GuidanceState,
    /// Committed annotation boxes.
    pub boxes: Vec<BoundingBox>,
    /// Whether an image is waiting to be sent.
    pub has_working_image: bool,
}

struct StreamRun {
    id: MessageId,
    step: Step,
}

// ============================================================================
// Session
// ============================================================================

/// One learner's tutoring session.
///
/// Operations take `&mut self`, so they never interleave on the same session.
#[derive(Debug)]
pub struct Session<T> {
    transport: Arc<T>,
    config: Config,
    locale: Locale,
    ids: IdSource,
    conversation: Conversation,
    mode: SessionMode,
    resume: SessionMode,
    mistakes: Vec<Mistake>,
    guidance: GuidanceSession,
    working_image: Option<ImageRef>,
    annotations: AnnotationEngine,
    pending: PendingRequests,
    events: EventBroadcaster,
    last_detection: Option<DetectionReport>,
}

impl<T: Transport> Session<T> {
    /// Creates a session from a validated configuration.
    pub fn new(transport: Arc<T>, config: Config) -> Result<Self> {
        Self::with_ids(transport, config, IdSource::new())
    }

    /// Creates a session drawing message and box ids from `ids`.
    pub fn with_ids(transport: Arc<T>, config: Config, ids: IdSource) -> Result<Self> {
        config.validate()?;
        let locale = config.locale();
        Ok(Self {
            transport,
            guidance: GuidanceSession::new(&locale),
            annotations: AnnotationEngine::new(ids.clone(), &locale, config.min_box_size),
            events: EventBroadcaster::new(config.event_capacity),
            ids,
            locale,
            config,
            conversation: Conversation::new(),
            mode: SessionMode::Idle,
            resume: SessionMode::Idle,
            mistakes: Vec::new(),
            working_image: None,
            pending: PendingRequests::new(),
            last_detection: None,
        })
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    /// Validates an image, shows it as a user message and holds it for the
    /// next solve or detection.
    pub fn attach_image(&mut self, image: ImageRef) -> Result<MessageId> {
        validate_image(&image, self.config.max_image_bytes)?;
        self.recover_abandoned_stream();
        self.annotations.clear_all();
        let id = self.ids.next_id();
        info!(message_id = %id, bytes = image.len(), mime = %image.mime_type, "Image attached");
        self.append(Message::user(id, String::new(), Some(image.clone())));
        self.working_image = Some(image);
        Ok(id)
    }

    /// Loads an image file and attaches it.
    pub fn attach_image_file(&mut self, path: impl AsRef<Path>) -> Result<MessageId> {
        let image = load_image(path, self.config.max_image_bytes)?;
        self.attach_image(image)
    }

    /// Routes learner text according to the current mode.
    ///
    /// Validation failures are returned as errors. Backend failures are not:
    /// they end up in the conversation and come back as [`Outcome::Failed`].
    pub async fn submit(&mut self, text: &str) -> Result<Outcome> {
        self.recover_abandoned_stream();
        let text = text.trim();
        debug!(mode = %self.mode, chars = text.chars().count(), "Submit");
        match self.mode {
            SessionMode::Idle => self.submit_idle(text).await,
            SessionMode::AwaitingConfirmation => self.submit_confirmation(text).await,
            SessionMode::GuidanceActive => self.submit_guidance(text).await,
            SessionMode::Streaming => Ok(self.ignore(&TutorError::invalid_state("submit", self.mode))),
        }
    }

    async fn submit_idle(&mut self, text: &str) -> Result<Outcome> {
        if text.is_empty() {
            if self.conversation.last().is_some_and(Message::is_image_only) {
                return self.detect_mistakes().await;
            }
            if self.working_image.is_none() {
                return Err(TutorError::EmptySubmission);
            }
        }
        self.solve(text).await
    }

    async fn submit_confirmation(&mut self, text: &str) -> Result<Outcome> {
        if text.is_empty() && self.working_image.is_none() {
            return Err(TutorError::EmptySubmission);
        }
        let decision = confirmation::classify(text, self.mistakes.len(), &self.locale.commands);
        debug!(?decision, candidates = self.mistakes.len(), "Confirmation classified");

        match decision {
            Confirmation::SelectAll => {
                let selected = self.mistakes.clone();
                Ok(self.start_guidance(text, selected))
            }
            Confirmation::SelectSubset(positions) => {
                let selected = positions
                    .iter()
                    .filter_map(|p| self.mistakes.get(p - 1).cloned())
                    .collect();
                Ok(self.start_guidance(text, selected))
            }
            Confirmation::Redetect => {
                info!("Redetect requested; clearing session");
                self.reset();
                self.events
                    .send(SessionEvent::notice(self.locale.redetect_notice()));
                Ok(Outcome::Reset)
            }
            Confirmation::NoMatch => {
                self.set_mode(SessionMode::Idle);
                self.solve(text).await
            }
        }
    }

    async fn submit_guidance(&mut self, text: &str) -> Result<Outcome> {
        if text.is_empty() {
            return Err(TutorError::EmptySubmission);
        }
        let step = match self.guidance.submit(text) {
            Ok(step) => step,
            Err(e) => return Ok(self.ignore(&e)),
        };
        let id = self.ids.next_id();
        self.append(Message::user(id, text, None));

        match step {
            GuidanceStep::Exited { reply } => {
                self.reply(reply);
                self.set_mode(SessionMode::Idle);
                Ok(Outcome::GuidanceExited)
            }
            GuidanceStep::Advanced { reply } => {
                self.reply(reply);
                Ok(Outcome::GuidanceAdvanced)
            }
            GuidanceStep::Completed { summary, total } => {
                self.reply(summary);
                self.set_mode(SessionMode::Idle);
                Ok(Outcome::GuidanceCompleted { total })
            }
            GuidanceStep::Forward(request) => {
                let run = self.run_stream(BackendRequest::Guide(request)).await;
                self.set_mode(SessionMode::GuidanceActive);
                if matches!(run.step, Step::Finished(_)) {
                    let answer = self.content_of(run.id);
                    self.guidance.record_exchange(text, &answer);
                }
                Ok(Self::stream_outcome(run.step, Outcome::GuidanceReply))
            }
        }
    }

    fn start_guidance(&mut self, text: &str, selected: Vec<Mistake>) -> Outcome {
        let id = self.ids.next_id();
        self.append(Message::user(id, text, None));
        let intro = match self.guidance.start(selected) {
            Ok(intro) => intro,
            Err(e) => return self.ignore(&e),
        };
        let count = self.guidance.mistakes().len();
        self.reply(intro);
        self.set_mode(SessionMode::GuidanceActive);
        Outcome::GuidanceStarted { count }
    }

    // ------------------------------------------------------------------------
    // Backend operations
    // ------------------------------------------------------------------------

    async fn solve(&mut self, text: &str) -> Result<Outcome> {
        let image = self.working_image.take();
        let question = if text.is_empty() {
            self.locale.default_question().to_string()
        } else {
            text.to_string()
        };
        let history = self.request_history();
        self.record_user_turn(&question, image.clone());

        let request = BackendRequest::Solve(SolveRequest {
            message: question,
            conversation_history: history,
            image_data: image.as_ref().map(ImageRef::to_base64),
        });
        let run = self.run_stream(request).await;
        self.set_mode(SessionMode::Idle);
        Ok(Self::stream_outcome(run.step, Outcome::Answered))
    }

    /// Sends the current image (and any marks) to mistake detection.
    ///
    /// On success the session waits for the learner to confirm the detected
    /// mistakes; with nothing detected it returns to `Idle`.
    pub async fn detect_mistakes(&mut self) -> Result<Outcome> {
        self.recover_abandoned_stream();
        if !matches!(
            self.mode,
            SessionMode::Idle | SessionMode::AwaitingConfirmation
        ) {
            return Ok(self.ignore(&TutorError::invalid_state("detect mistakes", self.mode)));
        }

        let image_only = self
            .conversation
            .last()
            .filter(|m| m.is_image_only())
            .cloned();
        let image = self
            .working_image
            .take()
            .or_else(|| image_only.as_ref().and_then(|m| m.image.clone()))
            .or_else(|| self.latest_image());
        let Some(image) = image else {
            return Err(TutorError::EmptySubmission);
        };

        let marks = self.annotations.take_marks();
        let prompt = self.locale.detection_prompt(marks.len());
        if let Some(mut message) = image_only {
            message.content = prompt;
            self.update_message(message);
        } else {
            let id = self.ids.next_id();
            self.append(Message::user(id, prompt, Some(image.clone())));
        }

        info!(marks = marks.len(), bytes = image.len(), "Detecting mistakes");
        let request = BackendRequest::DetectMistakes(DetectRequest {
            image_data: image.to_base64(),
            image_type: image.mime_type.clone(),
            user_marks: marks,
        });
        let run = self.run_stream(request).await;

        let data = match run.step {
            Step::Finished(data) => data,
            other => {
                self.set_mode(SessionMode::Idle);
                return Ok(Self::stream_outcome(other, Outcome::Ignored));
            }
        };

        let mistakes = parse_mistakes(data.as_ref());
        self.last_detection = Some(DetectionReport {
            mistakes: mistakes.clone(),
            analysis: self.content_of(run.id),
            image,
        });

        if mistakes.is_empty() {
            info!("No mistakes detected");
            self.mistakes.clear();
            self.reply(self.locale.no_mistakes());
            self.set_mode(SessionMode::Idle);
            return Ok(Outcome::NoMistakesFound);
        }

        let count = mistakes.len();
        info!(count, "Mistakes detected; awaiting confirmation");
        let id = self.ids.next_id();
        let prompt = Message::assistant(id, self.locale.confirmation_prompt(&mistakes))
            .with_options(self.locale.confirmation_choices());
        self.mistakes = mistakes;
        self.append(prompt);
        self.set_mode(SessionMode::AwaitingConfirmation);
        Ok(Outcome::AwaitingConfirmation { count })
    }

    /// Diagnoses why `question` went wrong, then opens guidance on it.
    ///
    /// The diagnosis is attached to the active guidance walk-through, or a
    /// one-question walk-through is started for it.
    pub async fn diagnose(&mut self, question: &str, student_answer: Option<&str>) -> Result<Outcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TutorError::EmptySubmission);
        }
        self.recover_abandoned_stream();
        if !matches!(self.mode, SessionMode::Idle | SessionMode::GuidanceActive) {
            return Ok(self.ignore(&TutorError::invalid_state("diagnose", self.mode)));
        }
        let resume = self.mode;

        let image = self.working_image.take();
        self.record_user_turn(question, image.clone());
        let student_answer = student_answer
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map_or_else(|| self.locale.unknown_answer().to_string(), ToString::to_string);

        let request = BackendRequest::Diagnose(DiagnoseRequest {
            question: question.to_string(),
            student_answer,
            image_data: image.as_ref().map(ImageRef::to_base64),
        });
        let run = self.run_stream(request).await;

        let data = match run.step {
            Step::Finished(data) => data,
            other => {
                self.set_mode(resume);
                return Ok(Self::stream_outcome(other, Outcome::Ignored));
            }
        };

        let diagnosis = parse_diagnosis(data);
        let report = self.locale.diagnosis_report(
            &diagnosis.knowledge_point,
            &diagnosis.error_type,
            &diagnosis.description,
        );
        match self.conversation.get(run.id).cloned() {
            Some(mut message) => {
                message.content = report;
                self.update_message(message);
            }
            None => self.reply(report),
        }
        info!(knowledge_point = %diagnosis.knowledge_point, "Diagnosis complete");

        if !self.guidance.is_active() {
            let mut meta = Map::new();
            meta.insert("question".to_string(), Value::String(question.to_string()));
            let mistake = Mistake {
                question_no: None,
                meta,
            };
            if let Err(e) = self.guidance.start(vec![mistake]) {
                self.set_mode(resume);
                return Ok(self.ignore(&e));
            }
        }
        self.guidance.set_question(question);
        self.guidance.attach_diagnosis(diagnosis.clone());
        self.set_mode(SessionMode::GuidanceActive);

        let opening = match self.guidance.opening_request() {
            Ok(request) => request,
            Err(e) => return Ok(self.ignore(&e)),
        };
        let run = self.run_stream(BackendRequest::Guide(opening)).await;
        self.set_mode(SessionMode::GuidanceActive);
        if let Step::Failed(message) = run.step {
            return Ok(Outcome::Failed { message });
        }
        Ok(Outcome::Diagnosed(diagnosis))
    }

    /// Discards the conversation and every piece of mode state.
    pub fn new_session(&mut self) {
        info!(messages = self.conversation.len(), "Starting new session");
        self.reset();
    }

    /// Returns a handle for single-shot calls that may run alongside the
    /// main flow.
    #[must_use]
    pub fn recognizer(&self) -> Recognizer<T> {
        Recognizer {
            transport: Arc::clone(&self.transport),
            pending: self.pending.clone(),
            events: self.events.clone(),
            max_image_bytes: self.config.max_image_bytes,
        }
    }

    // ------------------------------------------------------------------------
    // Stream driving
    // ------------------------------------------------------------------------

    async fn run_stream(&mut self, request: BackendRequest) -> StreamRun {
        let operation = request.operation();
        let guard = self.pending.acquire();
        self.events
            .send(SessionEvent::busy_changed(self.pending.count()));

        for stale in self.conversation.settle_pending() {
            warn!(message_id = %stale, "Settled an unfinished placeholder");
        }
        let id = self.ids.next_id();
        self.append(Message::placeholder(id));
        self.resume = self.mode;
        self.set_mode(SessionMode::Streaming);
        info!(operation, message_id = %id, "Dispatching request");

        let mut accumulator = MessageAccumulator::new(id, &self.locale);
        let step = match self.transport.open_stream(&request).await {
            Ok(chunks) => {
                self.fold_stream(&mut accumulator, frame::decode(chunks))
                    .await
            }
            Err(e) => {
                error!(operation, error = %e, "Request failed before streaming");
                let text = self.locale.transport_failure(&failure_detail(&e));
                accumulator.abort(&mut self.conversation, text)
            }
        };
        self.publish_message(id);

        if matches!(step, Step::Finished(_))
            && self
                .conversation
                .get(id)
                .is_some_and(|m| m.content.is_empty())
        {
            self.remove_message(id);
        }

        drop(guard);
        self.events
            .send(SessionEvent::busy_changed(self.pending.count()));
        debug!(operation, step = ?step, "Request finished");
        StreamRun { id, step }
    }

    async fn fold_stream(
        &mut self,
        accumulator: &mut MessageAccumulator,
        mut events: BoxStream<'static, Result<StreamEvent>>,
    ) -> Step {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    let step = accumulator.fold(&mut self.conversation, event);
                    if step.is_final() {
                        return step;
                    }
                    self.publish_message(accumulator.target());
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Skipping undecodable frame");
                }
                Err(e) => {
                    error!(error = %e, "Stream interrupted");
                    let text = self.locale.transport_failure(&failure_detail(&e));
                    return accumulator.abort(&mut self.conversation, text);
                }
            }
        }

        let has_content = self
            .conversation
            .get(accumulator.target())
            .is_some_and(|m| !m.content.is_empty());
        if has_content {
            warn!("Stream ended without a done event; keeping partial answer");
            accumulator.fold(&mut self.conversation, StreamEvent::Done { data: None })
        } else {
            warn!("Stream ended without any content");
            let text = self.locale.transport_failure(self.locale.empty_response());
            accumulator.abort(&mut self.conversation, text)
        }
    }

    /// Cleans up after an operation that was dropped while streaming.
    ///
    /// Operations borrow the session mutably, so a stored `Streaming` mode
    /// seen outside one can only come from a stream nobody is folding
    /// anymore.
    fn recover_abandoned_stream(&mut self) {
        if self.mode != SessionMode::Streaming {
            return;
        }
        warn!(resume = %self.resume, "Recovering from an abandoned stream");
        let pending: Vec<MessageId> = self
            .conversation
            .messages()
            .iter()
            .filter(|m| m.pending)
            .map(|m| m.id)
            .collect();
        for id in pending {
            self.remove_message(id);
        }
        self.events
            .send(SessionEvent::busy_changed(self.pending.count()));
        self.set_mode(self.resume);
    }

    fn stream_outcome(step: Step, success: Outcome) -> Outcome {
        match step {
            Step::Finished(_) => success,
            Step::Failed(message) => Outcome::Failed { message },
            Step::Continue | Step::Stale | Step::Ignored => Outcome::Ignored,
        }
    }

    // ------------------------------------------------------------------------
    // Conversation bookkeeping
    // ------------------------------------------------------------------------

    fn append(&mut self, message: Message) {
        self.events
            .send(SessionEvent::MessageAppended(message.clone()));
        self.conversation.push(message);
    }

    fn reply(&mut self, content: impl Into<String>) {
        let id = self.ids.next_id();
        self.append(Message::assistant(id, content));
    }

    fn update_message(&mut self, message: Message) {
        if self.conversation.replace(message.clone()) {
            self.events.send(SessionEvent::MessageUpdated(message));
        }
    }

    fn publish_message(&self, id: MessageId) {
        if let Some(message) = self.conversation.get(id) {
            self.events
                .send(SessionEvent::MessageUpdated(message.clone()));
        }
    }

    fn remove_message(&mut self, id: MessageId) {
        if let Some(message) = self.conversation.remove(id) {
            self.events.send(SessionEvent::MessageRemoved(message));
        }
    }

    /// Shows the learner's turn. An image-only message holding the same
    /// image takes the text instead of a second message being added.
    fn record_user_turn(&mut self, content: &str, image: Option<ImageRef>) {
        let reuse = self
            .conversation
            .last()
            .filter(|m| m.is_image_only() && image.is_some() && m.image == image)
            .cloned();
        if let Some(mut message) = reuse {
            message.content = content.to_string();
            self.update_message(message);
        } else {
            let id = self.ids.next_id();
            self.append(Message::user(id, content, image));
        }
    }

    fn request_history(&self) -> Vec<HistoryEntry> {
        self.conversation
            .history()
            .into_iter()
            .filter(|entry| !entry.content.trim().is_empty())
            .collect()
    }

    fn content_of(&self, id: MessageId) -> String {
        self.conversation
            .get(id)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn latest_image(&self) -> Option<ImageRef> {
        self.conversation
            .messages()
            .iter()
            .rev()
            .find_map(|m| m.image.clone())
    }

    fn set_mode(&mut self, to: SessionMode) {
        if self.mode == to {
            return;
        }
        info!(from = %self.mode, to = %to, "Mode transition");
        self.events.send(SessionEvent::mode_changed(self.mode, to));
        self.mode = to;
    }

    fn ignore(&self, err: &TutorError) -> Outcome {
        warn!(error = %err, mode = %self.mode, "Ignoring operation");
        self.events.send(SessionEvent::notice(err.to_string()));
        Outcome::Ignored
    }

    fn reset(&mut self) {
        self.conversation.clear();
        self.events.send(SessionEvent::ConversationCleared);
        self.mistakes.clear();
        self.guidance = GuidanceSession::new(&self.locale);
        self.working_image = None;
        self.annotations.clear_all();
        self.last_detection = None;
        self.set_mode(SessionMode::Idle);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current mode.
    ///
    /// A stream abandoned by its caller reports the mode it would have
    /// returned to.
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        match self.mode {
            SessionMode::Streaming => self.resume,
            mode => mode,
        }
    }

    /// The conversation log.
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Mistakes from the last detection.
    #[must_use]
    pub fn mistakes(&self) -> &[Mistake] {
        &self.mistakes
    }

    /// The guidance walk-through.
    #[must_use]
    pub const fn guidance(&self) -> &GuidanceSession {
        &self.guidance
    }

    /// The image waiting to be sent, if any.
    #[must_use]
    pub const fn working_image(&self) -> Option<&ImageRef> {
        self.working_image.as_ref()
    }

    /// The annotation engine.
    #[must_use]
    pub const fn annotations(&self) -> &AnnotationEngine {
        &self.annotations
    }

    /// Mutable access to the annotation engine, for drawing boxes.
    pub fn annotations_mut(&mut self) -> &mut AnnotationEngine {
        &mut self.annotations
    }

    /// The most recent detection result.
    #[must_use]
    pub const fn last_detection(&self) -> Option<&DetectionReport> {
        self.last_detection.as_ref()
    }

    /// The event broadcaster.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The in-flight request counter.
    #[must_use]
    pub const fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Returns `true` while any request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pending.is_busy()
    }

    /// The active locale.
    #[must_use]
    pub const fn locale(&self) -> &Locale {
        &self.locale
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Copies the observable state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode(),
            messages: self.conversation.messages().to_vec(),
            mistakes: self.mistakes.clone(),
            busy: self.pending.is_busy(),
            guidance: self.guidance.state(),
            boxes: self.annotations.boxes().to_vec(),
            has_working_image: self.working_image.is_some(),
        }
    }
}

// ============================================================================
// Single-shot handle
// ============================================================================

/// Runs single-shot backend calls concurrently with the main session flow.
///
/// Shares the session's request counter and event broadcaster.
#[derive(Debug)]
pub struct Recognizer<T> {
    transport: Arc<T>,
    pending: PendingRequests,
    events: EventBroadcaster,
    max_image_bytes: usize,
}

impl<T> Clone for Recognizer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            pending: self.pending.clone(),
            events: self.events.clone(),
            max_image_bytes: self.max_image_bytes,
        }
    }
}

impl<T: Transport> Recognizer<T> {
    /// Recognizes the question shown in `image`.
    pub async fn analyze(&self, image: &ImageRef) -> Result<AnalyzeResponse> {
        validate_image(image, self.max_image_bytes)?;
        let request = AnalyzeRequest {
            image_data: image.to_base64(),
            image_type: image.mime_type.clone(),
        };
        info!(bytes = image.len(), "Recognizing question");
        self.tracked(self.transport.analyze(&request)).await
    }

    /// Asks a question without streaming.
    pub async fn chat(&self, message: &str, history: Vec<HistoryEntry>) -> Result<ChatResponse> {
        let request = SolveRequest {
            message: message.to_string(),
            conversation_history: history,
            image_data: None,
        };
        self.tracked(self.transport.chat(&request)).await
    }

    async fn tracked<R>(&self, call: impl Future<Output = R>) -> R {
        let guard = self.pending.acquire();
        self.events
            .send(SessionEvent::busy_changed(self.pending.count()));
        let result = call.await;
        drop(guard);
        self.events
            .send(SessionEvent::busy_changed(self.pending.count()));
        result
    }
}

// ============================================================================
// Result parsing
// ============================================================================

/// Extracts the mistake list from a detection result. Malformed entries are
/// skipped.
fn parse_mistakes(data: Option<&Value>) -> Vec<Mistake> {
    let list = match data {
        Some(Value::Object(object)) => object.get("mistakes"),
        Some(array @ Value::Array(_)) => Some(array),
        _ => None,
    };
    let Some(Value::Array(items)) = list else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Mistake>(item.clone()) {
            Ok(mistake) => Some(mistake),
            Err(e) => {
                warn!(error = %e, "Skipping malformed mistake entry");
                None
            }
        })
        .collect()
}

fn parse_diagnosis(data: Option<Value>) -> Diagnosis {
    match data.map(serde_json::from_value::<Diagnosis>) {
        Some(Ok(diagnosis)) => diagnosis,
        Some(Err(e)) => {
            warn!(error = %e, "Malformed diagnosis result");
            Diagnosis::default()
        }
        None => Diagnosis::default(),
    }
}

fn failure_detail(err: &TutorError) -> String {
    match err {
        TutorError::Transport { message, .. } | TutorError::Stream { message } => message.clone(),
        other => other.to_string(),
    }
}
