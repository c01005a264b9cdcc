//! Integration tests against an in-process mock tutoring backend.
//!
//! The mock speaks the same HTTP + server-sent-event protocol as the real
//! backend and deliberately cuts its bodies into small chunks, so frames and
//! multi-byte characters straddle chunk boundaries on the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tutor_history::{AnalysisRecord, ConversationRecord, HistoryStore, TranscriptGenerator};
use tutor_session::{
    Config, HttpTransport, ImageRef, Outcome, Point, Role, Session, SessionMode,
};

/// Bytes per body chunk sent by the mock.
const CHUNK_SIZE: usize = 5;

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockState {
    fn record(&self, path: &str, body: Value) {
        self.requests
            .lock()
            .expect("mock state poisoned")
            .push((path.to_string(), body));
    }

    fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .expect("mock state poisoned")
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

/// Builds an event-stream response from JSON frames, chunked awkwardly.
fn sse(frames: &[Value]) -> Response {
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(format!("data: {frame}\n\n").as_bytes());
    }
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        body.chunks(CHUNK_SIZE).map(|c| Ok(c.to_vec())).collect();
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

async fn chat_stream(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    let message = body["message"].as_str().unwrap_or_default().to_string();
    state.record("/api/chat/stream", body);
    if message.contains("fail") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
    }
    if message.contains("stall") {
        let first = format!("data: {}\n\n", json!({"content": "想"}));
        let chunks = futures::stream::iter([Ok::<_, std::io::Error>(first.into_bytes())])
            .chain(futures::stream::pending());
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(chunks),
        )
            .into_response();
    }
    sse(&[
        json!({"status": "analyzing", "message": "AI正在分析中..."}),
        json!({"content": "x = 2，", "done": false}),
        json!({"content": "答案是二", "done": false}),
        json!({"done": true}),
    ])
}

async fn detect_stream(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.record("/api/detect/mistakes/stream", body);
    sse(&[
        json!({"status": "start", "message": "开始分析试卷"}),
        json!({"content": "## 学情分析\n计算题失分较多"}),
        json!({"done": true, "data": {
            "mistakes": [
                {"question_no": 3, "reason": "红叉"},
                {"questionNo": "5", "reason": "扣分"}
            ],
            "need_confirmation": true
        }}),
    ])
}

async fn diagnose_stream(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.record("/api/diagnose/analyze/stream", body);
    sse(&[
        json!({"status": "analyzing", "message": "正在分析错误原因..."}),
        json!({"content": "{\"knowledge_point\":"}),
        json!({"done": true, "data": {
            "knowledge_point": "分数加法",
            "error_type": "计算错误",
            "problem_description": "没有通分"
        }}),
    ])
}

async fn guide_stream(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.record("/api/diagnose/guide/stream", body);
    sse(&[
        json!({"content": "想一想，"}),
        json!({"content": "分母相同吗？"}),
        json!({"done": true}),
    ])
}

async fn analyze(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.record("/api/analyze/question", body);
    Json(json!({"success": true, "data": {"question": "1/2 + 1/3 = ?"}}))
}

async fn chat(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.record("/api/chat", body);
    Json(json!({"success": true, "response": "答案是 5/6"}))
}

/// Spawns the mock backend and returns its base URL.
async fn spawn_backend(state: MockState) -> String {
    let router = Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/detect/mistakes/stream", post(detect_stream))
        .route("/api/diagnose/analyze/stream", post(diagnose_stream))
        .route("/api/diagnose/guide/stream", post(guide_stream))
        .route("/api/analyze/question", post(analyze))
        .route("/api/chat", post(chat))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    format!("http://{addr}")
}

fn session_for(base_url: &str) -> Session<HttpTransport> {
    session_with_read_timeout(base_url, Duration::from_secs(5))
}

fn session_with_read_timeout(base_url: &str, read_timeout: Duration) -> Session<HttpTransport> {
    let transport = HttpTransport::new(base_url, Duration::from_secs(5), read_timeout)
        .expect("Failed to build transport");
    let config = Config {
        api_base_url: base_url.to_string(),
        ..Config::default()
    };
    Session::new(Arc::new(transport), config).expect("Failed to create session")
}

fn exam_page() -> ImageRef {
    ImageRef::new(b"\x89PNG\r\n\x1a\nexam".to_vec(), "image/png", "exam.png")
}

// ============================================================================
// Tests
// ============================================================================

/// Upload, detect, confirm one mistake, one Socratic turn, then finish.
#[tokio::test]
async fn test_detect_confirm_and_guide_over_http() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let mut session = session_for(&base_url);

    session.attach_image(exam_page()).expect("attach failed");
    let outcome = session.submit("").await.expect("detect failed");
    assert_eq!(outcome, Outcome::AwaitingConfirmation { count: 2 });
    assert_eq!(session.mode(), SessionMode::AwaitingConfirmation);

    let detect = &state.bodies("/api/detect/mistakes/stream")[0];
    assert_eq!(detect["image_type"], "image/png");
    assert_eq!(detect["image_data"], exam_page().to_base64());
    assert_eq!(detect["user_marks"], json!([]));

    let report = session.last_detection().expect("no detection report");
    assert_eq!(report.analysis, "## 学情分析\n计算题失分较多");

    let outcome = session.submit("2").await.expect("confirm failed");
    assert_eq!(outcome, Outcome::GuidanceStarted { count: 1 });

    let outcome = session.submit("我不会通分").await.expect("guide failed");
    assert_eq!(outcome, Outcome::GuidanceReply);
    assert_eq!(
        session.conversation().last().map(|m| m.content.as_str()),
        Some("想一想，分母相同吗？")
    );

    let guide = &state.bodies("/api/diagnose/guide/stream")[0];
    assert_eq!(guide["question"], "第5题");
    assert_eq!(guide["diagnosis"], "待诊断");
    assert_eq!(guide["student_response"], "我不会通分");

    let outcome = session.submit("下一题").await.expect("skip failed");
    assert_eq!(outcome, Outcome::GuidanceCompleted { total: 1 });
    assert_eq!(session.mode(), SessionMode::Idle);
    assert!(!session.is_busy());
    assert!(session.conversation().pending().is_none());
}

/// Multi-byte answers split across chunks arrive intact, and the second
/// question carries the first exchange as history.
#[tokio::test]
async fn test_solve_streams_over_http() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let mut session = session_for(&base_url);

    assert_eq!(session.submit("解方程 x+1=3").await.unwrap(), Outcome::Answered);
    assert_eq!(session.submit("为什么？").await.unwrap(), Outcome::Answered);

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content, "x = 2，答案是二");
    assert!(messages[1].status.is_none());

    let bodies = state.bodies("/api/chat/stream");
    assert!(bodies[0]["conversation_history"]
        .as_array()
        .is_some_and(Vec::is_empty));
    assert_eq!(bodies[1]["conversation_history"][1]["role"], "assistant");
    assert_eq!(
        bodies[1]["conversation_history"][1]["content"],
        "x = 2，答案是二"
    );
    assert!(bodies[0].get("image_data").is_none());
}

/// An HTTP error status ends up as a failure message, not an error.
#[tokio::test]
async fn test_http_error_becomes_failure_message() {
    let state = MockState::default();
    let base_url = spawn_backend(state).await;
    let mut session = session_for(&base_url);

    let outcome = session.submit("please fail").await.expect("submit errored");
    assert!(matches!(outcome, Outcome::Failed { .. }));

    let last = session.conversation().last().expect("no messages");
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.starts_with("抱歉"));
    assert!(last.content.contains("500"));
    assert!(!last.pending);
    assert_eq!(session.mode(), SessionMode::Idle);
    assert!(!session.is_busy());
}

/// A backend that goes quiet mid-stream trips the read timeout.
#[tokio::test]
async fn test_silent_backend_times_out() {
    let state = MockState::default();
    let base_url = spawn_backend(state).await;
    let mut session = session_with_read_timeout(&base_url, Duration::from_millis(300));

    let outcome = tokio::time::timeout(Duration::from_secs(10), session.submit("please stall"))
        .await
        .expect("read timeout did not fire")
        .expect("submit errored");

    assert!(matches!(outcome, Outcome::Failed { .. }));
    let last = session.conversation().last().expect("no messages");
    assert!(last.content.starts_with("抱歉"));
    assert!(!last.pending);
    assert_eq!(session.mode(), SessionMode::Idle);
    assert!(!session.is_busy());
}

/// Nothing listening on the port is reported the same way.
#[tokio::test]
async fn test_unreachable_backend() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);

    let mut session = session_for(&format!("http://{addr}"));
    let outcome = session.submit("hello").await.expect("submit errored");

    assert!(matches!(outcome, Outcome::Failed { .. }));
    let last = session.conversation().last().expect("no messages");
    assert!(last.content.starts_with("抱歉"));
    assert!(!session.is_busy());
}

/// Hand-drawn boxes travel with the detection request.
#[tokio::test]
async fn test_marks_sent_with_detection() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let mut session = session_for(&base_url);

    session.attach_image(exam_page()).expect("attach failed");
    session
        .annotations_mut()
        .draw(Point::new(40.0, 30.0), Point::new(10.0, 10.0))
        .expect("box rejected");
    session.detect_mistakes().await.expect("detect failed");

    let detect = &state.bodies("/api/detect/mistakes/stream")[0];
    let mark = &detect["user_marks"][0];
    assert_eq!(mark["questionNo"], "错题1");
    assert_eq!(mark["box"]["x"], 10.0);
    assert_eq!(mark["box"]["width"], 30.0);
    assert!(session.annotations().boxes().is_empty());
}

/// Diagnosis is rendered and guidance opens with a null learner response.
#[tokio::test]
async fn test_diagnose_opens_guidance_over_http() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let mut session = session_for(&base_url);

    let outcome = session
        .diagnose("1/2 + 1/3 = ?", Some("2/5"))
        .await
        .expect("diagnose failed");
    let Outcome::Diagnosed(diagnosis) = outcome else {
        panic!("expected a diagnosis, got {outcome:?}");
    };
    assert_eq!(diagnosis.error_type, "计算错误");
    assert_eq!(session.mode(), SessionMode::GuidanceActive);

    let opening = &state.bodies("/api/diagnose/guide/stream")[0];
    assert_eq!(opening["diagnosis"], "分数加法 - 没有通分");
    assert!(opening["student_response"].is_null());
    assert_eq!(opening["conversation_history"], json!([]));
}

/// Single-shot calls run while the session is idle and share its busy count.
#[tokio::test]
async fn test_single_shot_calls() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let session = session_for(&base_url);
    let recognizer = session.recognizer();

    let analyzed = tokio::spawn({
        let recognizer = recognizer.clone();
        async move { recognizer.analyze(&exam_page()).await }
    });
    let answered = recognizer
        .chat("1/2 + 1/3 = ?", Vec::new())
        .await
        .expect("chat failed");

    let analyzed = analyzed.await.expect("task panicked").expect("analyze failed");
    assert!(analyzed.success);
    assert_eq!(
        analyzed.data.and_then(|d| d["question"].as_str().map(String::from)),
        Some("1/2 + 1/3 = ?".to_string())
    );
    assert_eq!(answered.response.as_deref(), Some("答案是 5/6"));
    assert!(!session.is_busy());
    assert_eq!(state.bodies("/api/analyze/question")[0]["image_type"], "image/png");
}

/// A finished detection and conversation survive a save and reload.
#[tokio::test]
async fn test_history_round_trip_after_detection() {
    let state = MockState::default();
    let base_url = spawn_backend(state).await;
    let mut session = session_for(&base_url);
    let started = chrono::Utc::now();

    session.attach_image(exam_page()).expect("attach failed");
    session.submit("").await.expect("detect failed");

    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("history.json");
    let mut store = HistoryStore::new(&path, 20, 50);
    let report = session.last_detection().expect("no detection report");
    store.record_analysis(AnalysisRecord::capture(report, chrono::Utc::now()));
    let record = ConversationRecord::capture(session.conversation(), started, chrono::Utc::now())
        .expect("empty conversation");
    store.record_conversation(record);
    store.save().expect("save failed");

    let loaded = HistoryStore::load(&path, 20, 50).expect("load failed");
    assert_eq!(loaded.analyses()[0].mistake_count, 2);
    assert_eq!(loaded.summary(chrono::Utc::now()).total_mistakes, 2);

    let saved = &loaded.conversations()[0];
    assert!(saved.has_image);
    let markdown = TranscriptGenerator::new("exam", &saved.messages).generate();
    assert!(markdown.contains("题号 3"));
    assert!(markdown.contains("exam.png"));
}
