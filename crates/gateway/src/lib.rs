//! HTTP gateway for ChatRelay.
//!
//! Routes:
//! - `POST /api/chat`: stream a generation as a raw text body
//! - `POST /api/stop_generation`: stop one session, or any active one
//! - `GET  /api/history`: recent records of a daily log
//! - `GET  /api/sessions`: active session ids
//! - `GET  /health`: liveness
//!
//! Built on Axum. The chat body is not SSE-framed: the browser client reads
//! the chunks and concatenates them.

pub mod registry;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderName, Method, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chatrelay_agent::{ChatAgent, ChatInput, GenerationConfig};
use chatrelay_config::{AppConfig, ChatSettings, GenerationDefaults};
use chatrelay_core::provider::Provider;
use chatrelay_memory::history::today_key;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use registry::{SessionGuard, SessionRegistry};

/// Response header carrying the id a client needs to stop its session.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: ChatAgent,
    pub registry: Arc<SessionRegistry>,
    pub generation: GenerationDefaults,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the provider and stores described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let provider = chatrelay_providers::build_from_config(config);
        let history = Arc::new(chatrelay_memory::HistoryStore::new(
            config.storage.history_dir.clone(),
        ));
        let knowledge = Arc::new(chatrelay_memory::KnowledgeMatcher::new(
            config.storage.knowledge_dir.clone(),
            config.generation.knowledge_threshold,
        ));
        let agent = ChatAgent::new(provider, history, knowledge)
            .with_chunk_timeout(Duration::from_secs(config.gateway.chunk_timeout_secs));

        Self {
            agent,
            registry: Arc::new(SessionRegistry::new()),
            generation: config.generation.clone(),
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/stop_generation", post(stop_handler))
        .route("/api/history", get(history_handler))
        .route("/api/sessions", get(sessions_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins. With none configured no
/// `Access-Control-Allow-Origin` is sent, so only same-origin pages work.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)])
        .max_age(Duration::from_secs(3600));

    let parsed: Vec<_> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if !parsed.is_empty() {
        cors = cors.allow_origin(AllowOrigin::list(parsed));
    }
    cors
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config));

    let provider = state.agent.provider().clone();
    match provider.health_check().await {
        Ok(true) => {
            info!(provider = provider.name(), "Inference backend reachable");
            report_models(provider.as_ref(), &config.generation.model_name).await;
        }
        _ => warn!(
            provider = provider.name(),
            url = %config.backend.resolved_base_url(),
            "Inference backend not reachable yet; chat requests will fail until it is"
        ),
    }

    let app = build_router(state).layer(cors_layer(&config.gateway.cors_origins));

    info!(
        addr = %addr,
        model = %config.generation.model_name,
        history_dir = %config.storage.history_dir.display(),
        knowledge_dir = %config.storage.knowledge_dir.display(),
        "Gateway listening"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// Log the backend's models. Returns whether the default model is among
/// them, or `None` when the backend does not say.
async fn report_models(provider: &dyn Provider, default_model: &str) -> Option<bool> {
    match provider.list_models().await {
        Ok(models) if models.is_empty() => None,
        Ok(models) => {
            info!(count = models.len(), models = %models.join(", "), "Backend models");
            let offered = models.iter().any(|m| m == default_model);
            if !offered {
                warn!(model = %default_model, "Default model not offered by the backend");
            }
            Some(offered)
        }
        Err(e) => {
            warn!(error = %e, "Could not list backend models");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Body of `POST /api/chat`, in the browser client's field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: String,
    #[serde(default)]
    use_memory: bool,
    #[serde(default)]
    use_database: bool,
    /// Output of a client-side function. Usually a string, but any JSON is
    /// accepted and rendered as text.
    #[serde(default)]
    current_func: Option<serde_json::Value>,
    #[serde(default)]
    settings: ChatSettings,
}

fn function_result_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let config = GenerationConfig::resolve(&state.generation, &payload.settings);
    let guard = state.registry.register();
    let session_id = guard.id().to_string();

    info!(
        session = %session_id,
        use_memory = payload.use_memory,
        use_database = payload.use_database,
        model = %config.model_name,
        "Chat request"
    );

    let input = ChatInput {
        message: payload.message,
        use_memory: payload.use_memory,
        use_database: payload.use_database,
        function_result: function_result_text(payload.current_func),
    };
    let prompt = state.agent.prepare(&input, &config).await;

    let session = state
        .agent
        .session(&session_id, guard.signal(), state.registry.broadcast());
    let (rx, handle) = session.spawn(input.message, prompt, config);

    // The guard lives until the session finishes, not until the body is sent.
    let id_for_log = session_id.clone();
    tokio::spawn(async move {
        match handle.await {
            Ok(outcome) => info!(
                session = %id_for_log,
                state = ?outcome.state,
                bytes = outcome.bytes_forwarded,
                history_committed = outcome.history_committed,
                "Session finished"
            ),
            Err(e) => warn!(session = %id_for_log, error = %e, "Session task aborted"),
        }
        drop(guard);
    });

    let body = ReceiverStream::new(rx).map(|unit| Ok::<_, Infallible>(unit.render()));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8".to_string()),
            (HeaderName::from_static(SESSION_ID_HEADER), session_id),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct StopRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct StopResponse {
    status: &'static str,
    targeted: bool,
}

/// Always 200. The body is optional and parsed leniently, since legacy
/// clients post nothing.
async fn stop_handler(State(state): State<SharedState>, body: Bytes) -> Json<StopResponse> {
    let request: StopRequest = serde_json::from_slice(&body).unwrap_or_default();

    let (targeted, stopped) = match request.session_id.as_deref() {
        Some(id) if !id.is_empty() => (true, state.registry.stop(id)),
        _ => (false, state.registry.stop_any()),
    };
    if !stopped {
        info!(targeted, "Stop request matched no active session");
    }

    Json(StopResponse {
        status: "stopping",
        targeted,
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    date: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    date: String,
    records: Vec<String>,
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let date = query.date.unwrap_or_else(today_key);
    let limit = query.limit.unwrap_or(state.generation.history_count);
    let records = state.agent.history().recent(&date, limit).await;
    Json(HistoryResponse { date, records })
}

#[derive(Serialize)]
struct SessionsResponse {
    active: usize,
    ids: Vec<String>,
}

async fn sessions_handler(State(state): State<SharedState>) -> Json<SessionsResponse> {
    let ids = state.registry.active_ids();
    Json(SessionsResponse {
        active: ids.len(),
        ids,
    })
}
