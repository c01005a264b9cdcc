//! Backend operations and the HTTP gateway that carries them.
//!
//! The session only talks to the [`Transport`] trait, so tests drive it with
//! scripted chunk sequences and the binary plugs in [`HttpTransport`].

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::annotation::MistakeMark;
use crate::error::{Result, TransportErrorKind, TutorError};
use crate::message::HistoryEntry;

/// Raw response body chunks, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

// ============================================================================
// Request payloads
// ============================================================================

/// Body of the solve operation (free-form question answering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// The learner's question.
    pub message: String,
    /// Prior turns, oldest first.
    pub conversation_history: Vec<HistoryEntry>,
    /// Attached image, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

/// Body of the detect-mistakes operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Exam page, base64.
    pub image_data: String,
    /// Media type of the page.
    pub image_type: String,
    /// Regions the learner marked by hand.
    #[serde(default)]
    pub user_marks: Vec<MistakeMark>,
}

/// Body of the diagnose operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnoseRequest {
    /// The question text.
    pub question: String,
    /// What the learner answered.
    pub student_answer: String,
    /// Picture of the question, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

/// Body of the guide operation (one Socratic turn).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideRequest {
    /// The question being worked on.
    pub question: String,
    /// `"{knowledge point} - {description}"`, or a placeholder.
    pub diagnosis: String,
    /// The learner's latest reply; `None` for the opening prompt.
    pub student_response: Option<String>,
    /// Guidance exchanges so far.
    pub conversation_history: Vec<HistoryEntry>,
}

/// One streaming backend operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackendRequest {
    /// Answer a question.
    Solve(SolveRequest),
    /// Find marked mistakes on an exam page.
    DetectMistakes(DetectRequest),
    /// Diagnose why a question went wrong.
    Diagnose(DiagnoseRequest),
    /// Produce the next Socratic prompt.
    Guide(GuideRequest),
}

impl BackendRequest {
    /// Endpoint path, relative to the API base URL.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Solve(_) => "/api/chat/stream",
            Self::DetectMistakes(_) => "/api/detect/mistakes/stream",
            Self::Diagnose(_) => "/api/diagnose/analyze/stream",
            Self::Guide(_) => "/api/diagnose/guide/stream",
        }
    }

    /// Operation name, for logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Solve(_) => "solve",
            Self::DetectMistakes(_) => "detect",
            Self::Diagnose(_) => "diagnose",
            Self::Guide(_) => "guide",
        }
    }
}

// ============================================================================
// Single-shot payloads
// ============================================================================

/// Body of the single-shot analyze operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Question picture, base64.
    pub image_data: String,
    /// Media type of the picture.
    pub image_type: String,
}

/// Response of the single-shot analyze operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Whether recognition succeeded.
    pub success: bool,
    /// Recognized question content.
    #[serde(default)]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of the single-shot chat operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// The whole answer.
    #[serde(default)]
    pub response: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

/// Path of the single-shot analyze operation.
pub const ANALYZE_PATH: &str = "/api/analyze/question";

/// Path of the single-shot chat operation.
pub const CHAT_PATH: &str = "/api/chat";

// ============================================================================
// Transport trait
// ============================================================================

/// Carries requests to the tutoring backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a streaming request and returns the response body as chunks.
    ///
    /// Fails before yielding anything if the backend is unreachable or
    /// answers with a non-success status.
    async fn open_stream(&self, request: &BackendRequest) -> Result<ChunkStream>;

    /// Runs the single-shot question recognizer.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse>;

    /// Runs the single-shot chat operation.
    async fn chat(&self, request: &SolveRequest) -> Result<ChatResponse>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// [`Transport`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (e.g. `http://localhost:8000`).
    ///
    /// `read_timeout` bounds the wait for each read, so a backend that stops
    /// sending mid-stream fails the request instead of hanging it.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(TutorError::from)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!(%url, error = %e, "Backend request failed");
            TutorError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            error!(%url, status = status.as_u16(), "Backend returned an error status");
            let message = if body_text.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {}", body_text.trim())
            };
            return Err(TutorError::transport(
                TransportErrorKind::HttpStatus(status.as_u16()),
                message,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: &BackendRequest) -> Result<ChunkStream> {
        info!(operation = request.operation(), "Opening stream");
        let response = self.post(request.path(), request).await?;
        let chunks = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(TutorError::from)
            .boxed();
        Ok(chunks)
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        let response = self.post(ANALYZE_PATH, request).await?;
        response.json().await.map_err(|e| {
            TutorError::transport(TransportErrorKind::InvalidResponse, e.to_string())
        })
    }

    async fn chat(&self, request: &SolveRequest) -> Result<ChatResponse> {
        let response = self.post(CHAT_PATH, request).await?;
        response.json().await.map_err(|e| {
            TutorError::transport(TransportErrorKind::InvalidResponse, e.to_string())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn test_paths() {
        let guide = BackendRequest::Guide(GuideRequest {
            question: "q".to_string(),
            diagnosis: "d".to_string(),
            student_response: None,
            conversation_history: Vec::new(),
        });
        assert_eq!(guide.path(), "/api/diagnose/guide/stream");
        assert_eq!(guide.operation(), "guide");
    }

    #[test]
    fn test_solve_body_shape() {
        let request = BackendRequest::Solve(SolveRequest {
            message: "1+1?".to_string(),
            conversation_history: vec![HistoryEntry::new(Role::User, "hi")],
            image_data: None,
        });
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "message": "1+1?",
                "conversation_history": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn test_guide_body_sends_null_response() {
        let body = serde_json::to_value(BackendRequest::Guide(GuideRequest {
            question: "q".to_string(),
            diagnosis: "待诊断".to_string(),
            student_response: None,
            conversation_history: Vec::new(),
        }))
        .unwrap();
        assert!(body["student_response"].is_null());
        assert!(body.as_object().unwrap().contains_key("student_response"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let transport =
            HttpTransport::new("http://localhost:8000/", Duration::from_secs(1), Duration::from_secs(1))
                .unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8000");
        assert_eq!(
            transport.url(CHAT_PATH),
            "http://localhost:8000/api/chat"
        );
    }

    #[test]
    fn test_analyze_response_defaults() {
        let response: AnalyzeResponse =
            serde_json::from_str(r#"{"success": false, "error": "blurry"}"#).unwrap();
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.error.as_deref(), Some("blurry"));
    }
}
