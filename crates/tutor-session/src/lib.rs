//! Streaming Tutor Session Engine
//!
//! Drives a learner's conversation with the tutoring backend: decodes
//! server-sent event streams into messages, detects and confirms mistakes on
//! exam pages, and walks the learner through them one question at a time.

pub mod accumulator;
pub mod annotation;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod frame;
pub mod guidance;
pub mod image;
pub mod locale;
pub mod message;
pub mod requests;
pub mod session;
pub mod transport;

pub use accumulator::{MessageAccumulator, Step};
pub use annotation::{
    AnnotationEngine, BoundingBox, DragRect, MistakeMark, Point, DEFAULT_MIN_BOX_SIZE,
};
pub use config::{CommandOverrides, Config, HistoryConfig};
pub use confirmation::{classify, Confirmation};
pub use error::{DecodeError, Result, TransportErrorKind, TutorError};
pub use events::{
    BusyChangedPayload, EventBroadcaster, ModeChangedPayload, NoticePayload, SessionEvent,
};
pub use frame::{decode, FrameDecoder, StreamEvent};
pub use guidance::{GuidanceSession, GuidanceState, GuidanceStep};
pub use image::{load_image, validate_image, ImageFormat, DEFAULT_MAX_IMAGE_BYTES};
pub use locale::{CommandVocabulary, Language, Locale, MatchRule};
pub use message::{
    Choice, Conversation, Diagnosis, HistoryEntry, IdSource, ImageRef, Message, MessageId,
    Mistake, Role,
};
pub use requests::{PendingRequests, RequestGuard};
pub use session::{DetectionReport, Outcome, Recognizer, Session, SessionMode, SessionSnapshot};
pub use transport::{
    AnalyzeRequest, AnalyzeResponse, BackendRequest, ChatResponse, ChunkStream, DetectRequest,
    DiagnoseRequest, GuideRequest, HttpTransport, SolveRequest, Transport, ANALYZE_PATH, CHAT_PATH,
};
