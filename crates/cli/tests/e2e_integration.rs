//! End-to-end tests for the ChatRelay pipeline.
//!
//! These drive the HTTP router with a scripted backend and real flat-file
//! stores in a temp directory: context gathering, prompt composition,
//! streaming, stop requests and history persistence.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatrelay_agent::ChatAgent;
use chatrelay_config::{AppConfig, GenerationDefaults};
use chatrelay_core::error::ProviderError;
use chatrelay_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use chatrelay_gateway::{GatewayState, SESSION_ID_HEADER, SessionRegistry, build_router};
use chatrelay_memory::history::today_key;
use chatrelay_memory::{HistoryStore, KnowledgeMatcher};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

// ── Mock backends ─────────────────────────────────────────────────────────

/// Streams a fixed token list and records the prompts it was sent.
struct ScriptedProvider {
    tokens: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Backend("streaming only".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        let (tx, rx) = mpsc::channel(self.tokens.len() + 1);
        for token in &self.tokens {
            tx.send(Ok(StreamChunk::text(token.as_str()))).await.unwrap();
        }
        tx.send(Ok(StreamChunk::finished())).await.unwrap();
        Ok(rx)
    }
}

/// Hands out one receiver the test feeds by hand.
struct ManualProvider {
    rx: Mutex<Option<ChunkReceiver>>,
}

#[async_trait::async_trait]
impl Provider for ManualProvider {
    fn name(&self) -> &str {
        "manual"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Backend("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProviderError::Backend("already streamed".into()))
    }
}

/// Never answers its first stream request, then streams `tokens`.
struct WedgedOnceProvider {
    calls: AtomicUsize,
    tokens: Vec<String>,
}

#[async_trait::async_trait]
impl Provider for WedgedOnceProvider {
    fn name(&self) -> &str {
        "wedged_once"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Backend("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::channel(self.tokens.len() + 1);
        for token in &self.tokens {
            tx.send(Ok(StreamChunk::text(token.as_str()))).await.unwrap();
        }
        tx.send(Ok(StreamChunk::finished())).await.unwrap();
        Ok(rx)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn state_with(dir: &Path, provider: Arc<dyn Provider>) -> Arc<GatewayState> {
    let history = Arc::new(HistoryStore::new(dir.join("chatlist")));
    let knowledge = Arc::new(KnowledgeMatcher::new(dir.join("knowledge"), 15));
    Arc::new(GatewayState {
        agent: ChatAgent::new(provider, history, knowledge),
        registry: Arc::new(SessionRegistry::new()),
        generation: GenerationDefaults::default(),
    })
}

fn wedged_state(dir: &Path) -> Arc<GatewayState> {
    let provider = Arc::new(WedgedOnceProvider {
        calls: AtomicUsize::new(0),
        tokens: vec!["fresh answer".into()],
    });
    let history = Arc::new(HistoryStore::new(dir.join("chatlist")));
    let knowledge = Arc::new(KnowledgeMatcher::new(dir.join("knowledge"), 15));
    Arc::new(GatewayState {
        agent: ChatAgent::new(provider, history, knowledge).with_chunk_timeout(Duration::from_secs(5)),
        registry: Arc::new(SessionRegistry::new()),
        generation: GenerationDefaults::default(),
    })
}

async fn wait_until_idle(registry: &SessionRegistry) {
    while registry.active_count() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn chat(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stop(body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method("POST")
        .uri("/api/stop_generation");
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn text_of(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_memory_and_knowledge_flow_into_prompt_and_banner() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("knowledge")).unwrap();
    std::fs::write(
        dir.path().join("knowledge").join("apple_notes.txt"),
        "Apples\n\ngrow on  trees.",
    )
    .unwrap();
    std::fs::write(dir.path().join("knowledge").join("zebra.txt"), "Stripes").unwrap();

    let provider = Arc::new(ScriptedProvider::new(&[
        "<think>",
        "thinking about apples",
        "</think>",
        "Apples grow on trees.",
    ]));
    let state = state_with(dir.path(), provider.clone());

    // First turn: no context
    let first = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "apple"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_text = text_of(first).await;
    assert!(first_text.contains("\n###正在思考###\nthinking about apples\n###总结部分###\n"));

    // Second turn: memory and knowledge on
    let second = build_router(state.clone())
        .oneshot(chat(serde_json::json!({
            "message": "apple",
            "useMemory": true,
            "useDatabase": true,
            "currentFunc": "fn says 7",
            "settings": {"re_chatlist": 5, "max_results": 3}
        })))
        .await
        .unwrap();
    let banner = text_of(second).await;

    assert!(banner.starts_with("\n\n📌 正在参考以下信息：\n\n[历史对话 1]:\n["));
    assert!(banner.contains("user: apple\nAI: Apples grow on trees.\n\n"));
    assert!(banner.contains(
        "[数据库资料 1 - apple_notes.txt (关联性: 27.00)]:\nApples grow on trees.\n\n💡 AI思考过程：\n"
    ));
    assert!(!banner.contains("zebra"));

    let prompts = provider.prompts();
    assert_eq!(prompts[0], "apple");
    assert!(prompts[1].starts_with("apple\n\n[函数执行结果]:\nfn says 7\n\n[历史对话 1]:\n"));

    // Both turns persisted, reasoning stripped
    let records = state.agent.history().recent(&today_key(), 10).await;
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(record.ends_with("AI: Apples grow on trees."));
        assert!(!record.contains("###正在思考###"));
    }
}

#[tokio::test]
async fn e2e_targeted_stop_cancels_stream_without_history() {
    let dir = tempfile::tempdir().unwrap();
    let (up_tx, up_rx) = mpsc::channel(8);
    let provider = Arc::new(ManualProvider {
        rx: Mutex::new(Some(up_rx)),
    });
    let state = state_with(dir.path(), provider);

    let response = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "long story"})))
        .await
        .unwrap();
    let session_id = response.headers()[SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(state.registry.active_ids(), vec![session_id.clone()]);

    up_tx.send(Ok(StreamChunk::text("once upon"))).await.unwrap();

    // Wait until the first token has been relayed
    let mut body = response.into_body();
    let mut text = String::new();
    while !text.contains("once upon") {
        let frame = body.frame().await.unwrap().unwrap();
        if let Ok(data) = frame.into_data() {
            text.push_str(std::str::from_utf8(&data).unwrap());
        }
    }

    let stopped = build_router(state.clone())
        .oneshot(stop(Some(serde_json::json!({"session_id": session_id}))))
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&text_of(stopped).await).unwrap();
    assert_eq!(json["status"], "stopping");
    assert_eq!(json["targeted"], true);

    up_tx.send(Ok(StreamChunk::text(" a time"))).await.unwrap();

    let rest = body.collect().await.unwrap().to_bytes();
    text.push_str(std::str::from_utf8(&rest).unwrap());
    assert!(text.contains("once upon"));
    assert!(!text.contains(" a time"));
    assert!(!text.contains("[ERROR]"));

    assert!(state.agent.history().recent(&today_key(), 5).await.is_empty());
}

#[tokio::test]
async fn e2e_legacy_stop_reaches_active_session() {
    let dir = tempfile::tempdir().unwrap();
    let (up_tx, up_rx) = mpsc::channel(8);
    let provider = Arc::new(ManualProvider {
        rx: Mutex::new(Some(up_rx)),
    });
    let state = state_with(dir.path(), provider);

    let response = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "q"})))
        .await
        .unwrap();

    let stopped = build_router(state.clone()).oneshot(stop(None)).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text_of(stopped).await).unwrap();
    assert_eq!(json["targeted"], false);

    up_tx.send(Ok(StreamChunk::text("never shown"))).await.unwrap();
    let text = text_of(response).await;
    assert!(text.ends_with("💡 AI思考过程：\n"));
}

#[tokio::test]
async fn e2e_backend_failure_is_reported_inline() {
    let dir = tempfile::tempdir().unwrap();
    let (up_tx, up_rx) = mpsc::channel(8);
    let provider = Arc::new(ManualProvider {
        rx: Mutex::new(Some(up_rx)),
    });
    let state = state_with(dir.path(), provider);

    up_tx.send(Ok(StreamChunk::text("par"))).await.unwrap();
    up_tx
        .send(Err(ProviderError::Network("connection reset".into())))
        .await
        .unwrap();

    let response = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "q"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = text_of(response).await;
    assert!(text.ends_with("par[ERROR] Network error: connection reset\n\n"));
    assert!(state.agent.history().recent(&today_key(), 5).await.is_empty());
}

#[tokio::test]
async fn e2e_config_file_drives_gateway_state() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let history_dir = dir.path().join("logs");
    std::fs::write(
        &config_path,
        format!(
            r#"
[backend]
kind = "openai_compat"
base_url = "http://127.0.0.1:9/v1"

[gateway]
port = 8091

[storage]
history_dir = "{}"

[generation]
model_name = "qwen2.5:7b"
history_count = 4
"#,
            history_dir.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let config = AppConfig::load_from(&config_path).unwrap();
    assert_eq!(config.gateway.port, 8091);
    assert_eq!(config.generation.model_name, "qwen2.5:7b");

    let state = Arc::new(GatewayState::from_config(&config));
    assert_eq!(state.agent.provider().name(), "openai_compat");
    assert_eq!(state.agent.history().dir(), history_dir.as_path());
    assert_eq!(state.generation.history_count, 4);

    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&text_of(response).await).unwrap();
    assert_eq!(json["active"], 0);

    // The effective config survives a TOML round trip
    let reparsed: AppConfig = toml::from_str(&config.to_toml()).unwrap();
    assert_eq!(reparsed.generation.model_name, "qwen2.5:7b");
    assert_eq!(reparsed.backend.kind, config.backend.kind);
}

#[tokio::test(start_paused = true)]
async fn e2e_unresponsive_backend_times_out_and_frees_registry() {
    let dir = tempfile::tempdir().unwrap();
    let state = wedged_state(dir.path());

    let stalled = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "first"})))
        .await
        .unwrap();
    let text = text_of(stalled).await;
    assert!(text.ends_with("[ERROR] Request timed out: no data from backend for 5s\n\n"));

    wait_until_idle(&state.registry).await;

    // Nothing is active, so this stop has no effect
    let stopped = build_router(state.clone()).oneshot(stop(None)).await.unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    assert!(!state.registry.broadcast().is_requested());

    let next = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "second"})))
        .await
        .unwrap();
    assert!(text_of(next).await.ends_with("fresh answer"));
}

#[tokio::test(start_paused = true)]
async fn e2e_legacy_stop_for_stalled_session_does_not_leak() {
    let dir = tempfile::tempdir().unwrap();
    let state = wedged_state(dir.path());

    let stalled = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "first"})))
        .await
        .unwrap();
    let stopped = build_router(state.clone()).oneshot(stop(None)).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text_of(stopped).await).unwrap();
    assert_eq!(json["targeted"], false);

    // The waiting session consumes the stop and ends without an error
    let text = text_of(stalled).await;
    assert!(text.ends_with("💡 AI思考过程：\n"));
    wait_until_idle(&state.registry).await;
    assert!(!state.registry.broadcast().is_requested());

    let next = build_router(state.clone())
        .oneshot(chat(serde_json::json!({"message": "second"})))
        .await
        .unwrap();
    assert!(text_of(next).await.ends_with("fresh answer"));

    let records = state.agent.history().recent(&today_key(), 5).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].contains("user: second"));
}
