//! Error types for the tutor session engine.
//!
//! The hierarchy follows the way failures are handled at the orchestration
//! boundary: transport and stream failures become a user-visible message on
//! the pending placeholder, decode failures skip a single frame, validation
//! failures are rejected before any request is sent, and state errors are
//! logged and ignored.

use std::path::PathBuf;

/// A specialized `Result` type for tutor session operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while driving a tutoring session.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Validation Errors (rejected before dispatch)
    // ========================================================================
    /// Uploaded image exceeds the configured size ceiling.
    #[error("Image is too large: {size_bytes} bytes (limit {limit_bytes} bytes)\n\nSuggestion: Upload an image smaller than {limit_mb}MB")]
    ImageTooLarge {
        /// Actual payload size in bytes.
        size_bytes: usize,
        /// Configured ceiling in bytes.
        limit_bytes: usize,
        /// Ceiling in whole megabytes, for display.
        limit_mb: usize,
    },

    /// Uploaded file is not an image.
    #[error("Unsupported media type '{mime_type}': only image uploads are accepted")]
    UnsupportedMediaType {
        /// The rejected media type.
        mime_type: String,
    },

    /// Image file could not be read.
    #[error("Cannot read image '{path}': {message}")]
    ImageUnreadable {
        /// Path of the image file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Nothing to send: no text and no image.
    #[error("Nothing to submit: enter a question or attach an image")]
    EmptySubmission,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The backend could not be reached or answered with a non-2xx status.
    #[error("Backend request failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    Transport {
        /// Classification of the failure.
        kind: TransportErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// The backend reported a failure inside the stream.
    #[error("Backend reported an error: {message}")]
    Stream {
        /// The error description from the `error` frame.
        message: String,
    },

    /// A single frame could not be decoded.
    #[error("Frame decode error: {0}")]
    Decode(#[from] DecodeError),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Operation is not valid in the current state.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// The attempted operation.
        operation: String,
        /// The state that rejected it.
        state: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-frame decoding failures. None of them is fatal to the stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame payload is not valid JSON.
    #[error("invalid JSON payload: {source}")]
    InvalidJson {
        /// The payload that failed to parse.
        payload: String,
        /// The underlying parser error.
        source: serde_json::Error,
    },

    /// Payload is valid JSON but matches none of the known event shapes.
    #[error("unrecognized event shape: {payload}")]
    UnrecognizedShape {
        /// The payload that was not recognized.
        payload: String,
    },
}

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Backend answered with a non-success HTTP status.
    HttpStatus(u16),
    /// Connection could not be established or was reset.
    Network,
    /// Request timed out.
    Timeout,
    /// Response body could not be interpreted.
    InvalidResponse,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpStatus(code) => write!(f, "http {code}"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidResponse => write!(f, "invalid_response"),
        }
    }
}

impl TransportErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::HttpStatus(code) if *code >= 500 => {
                "Retry later; the tutoring service may be experiencing issues"
            }
            Self::HttpStatus(_) => "Check the request and the configured apiBaseUrl",
            Self::Network => "Check that the backend is running and reachable",
            Self::Timeout => "Retry; the backend took too long to answer",
            Self::InvalidResponse => "Check that apiBaseUrl points at the tutoring backend",
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ImageTooLarge` error.
    #[must_use]
    pub const fn image_too_large(size_bytes: usize, limit_bytes: usize) -> Self {
        Self::ImageTooLarge {
            size_bytes,
            limit_bytes,
            limit_mb: limit_bytes / (1024 * 1024),
        }
    }

    /// Creates a new `UnsupportedMediaType` error.
    #[must_use]
    pub fn unsupported_media_type(mime_type: impl Into<String>) -> Self {
        Self::UnsupportedMediaType {
            mime_type: mime_type.into(),
        }
    }

    /// Creates a new `ImageUnreadable` error.
    #[must_use]
    pub fn image_unreadable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ImageUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error with automatic suggestion based on kind.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `Stream` error.
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidState` error.
    #[must_use]
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Returns `true` if processing can continue after this error.
    ///
    /// Only per-frame decode errors are recoverable; everything else ends
    /// the operation that raised it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns `true` if this error was raised by local input validation.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ImageTooLarge { .. }
                | Self::UnsupportedMediaType { .. }
                | Self::ImageUnreadable { .. }
                | Self::EmptySubmission
        )
    }
}

impl From<reqwest::Error> for TutorError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if let Some(status) = err.status() {
            TransportErrorKind::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            TransportErrorKind::InvalidResponse
        } else {
            TransportErrorKind::Network
        };
        Self::transport(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = TutorError::image_too_large(11 * 1024 * 1024, 10 * 1024 * 1024);
        let msg = err.to_string();
        assert!(msg.contains("too large"));
        assert!(msg.contains("10MB"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportErrorKind::HttpStatus(503).to_string(), "http 503");
        assert_eq!(TransportErrorKind::Network.to_string(), "network");
        assert_eq!(TransportErrorKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_transport_suggestion_depends_on_status() {
        let server = TutorError::transport(TransportErrorKind::HttpStatus(500), "boom");
        assert!(server.to_string().contains("Retry later"));

        let client = TutorError::transport(TransportErrorKind::HttpStatus(404), "missing");
        assert!(client.to_string().contains("apiBaseUrl"));
    }

    #[test]
    fn test_is_recoverable() {
        let decode = TutorError::from(DecodeError::InvalidUtf8);
        assert!(decode.is_recoverable());

        let stream = TutorError::stream("quota exceeded");
        assert!(!stream.is_recoverable());

        let transport = TutorError::transport(TransportErrorKind::Network, "refused");
        assert!(!transport.is_recoverable());
    }

    #[test]
    fn test_is_validation() {
        assert!(TutorError::EmptySubmission.is_validation());
        assert!(TutorError::unsupported_media_type("text/plain").is_validation());
        assert!(!TutorError::stream("x").is_validation());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = TutorError::invalid_state("submit guidance reply", "completed");
        assert_eq!(
            err.to_string(),
            "Invalid state: cannot submit guidance reply while completed"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TutorError = io_err.into();
        assert!(matches!(err, TutorError::Io(_)));
    }
}
