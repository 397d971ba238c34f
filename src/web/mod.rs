//! HTTP/JSON API and the agent event WebSocket.

mod events;

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{AgentManager, MessageType, USER_AGENT_ID};
use crate::assistant::file_context::{UploadedFile, resolve_upload};
use crate::assistant::session::SessionStore;
use crate::assistant::{AssistantResponse, Dispatcher};
use crate::config::AppConfig;
use crate::error::{AgentError, IntegrationError};
use crate::integrations::SpeechService;
use crate::persona::{Persona, PersonaCatalog, PersonaHints, select_persona};

const DEFAULT_AUDIO_NAME: &str = "audio.webm";

/// Largest audio clip accepted for transcription (Whisper's own limit).
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
    pub agents: Arc<AgentManager>,
    pub speech: Arc<dyn SpeechService>,
    pub personas: Arc<PersonaCatalog>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        dispatcher: Arc<Dispatcher>,
        agents: Arc<AgentManager>,
        speech: Arc<dyn SpeechService>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            sessions: Arc::new(SessionStore::new()),
            agents,
            speech,
            personas: Arc::new(PersonaCatalog::default()),
        }
    }

    pub fn with_personas(mut self, personas: Arc<PersonaCatalog>) -> Self {
        self.personas = personas;
        self
    }
}

/// Build the router with every API route.
pub fn router(state: AppState) -> Router {
    let cors = if state.config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    // Multipart framing on top of the file itself.
    let upload_limit = state.config.max_file_size as usize + 64 * 1024;

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/{session_id}", delete(clear_session))
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/voice/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .route("/api/voice/speak", post(speak))
        .route("/api/tools", get(list_tools))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}/messages", post(send_agent_message))
        .route("/ws/events", get(events::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Web server listening");
    axum::serve(listener, router(state)).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn integration_status(err: &IntegrationError) -> StatusCode {
    match err {
        IntegrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        IntegrationError::NotFound(_) => StatusCode::NOT_FOUND,
        IntegrationError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
        IntegrationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.app_name,
        "version": state.config.app_version,
        "tools": state.dispatcher.tools().count(),
        "persona_selector": state.config.persona_selector_enabled,
        "personas": state.personas.len(),
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatRequest {
    session_id: Option<String>,
    message: String,
    persona: Option<Persona>,
    #[serde(default)]
    persona_hints: PersonaHints,
    uploaded_file: Option<UploadedFile>,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    if body.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message must not be empty");
    }
    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let uploaded_file = match &body.uploaded_file {
        Some(file) => match resolve_upload(file, &state.config.upload_dir).await {
            Some(file) => Some(file),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "uploaded_file must reference a file stored by /api/upload",
                );
            }
        },
        None => None,
    };

    let persona = match body.persona {
        Some(persona) => Some(persona),
        None if state.config.persona_selector_enabled => {
            select_persona(&state.personas, &body.persona_hints, &body.message)
                .map(|selection| selection.persona)
        }
        None => None,
    };

    let history = state.sessions.history(&session_id).await;
    let response = state
        .dispatcher
        .process_command(
            &body.message,
            &history,
            uploaded_file.as_ref(),
            persona.as_ref(),
        )
        .await;

    if let AssistantResponse::Error(message) = &response {
        warn!(session_id = %session_id, error = %message, "Chat turn failed");
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "session_id": session_id, "error": message })),
        )
            .into_response();
    }

    state
        .sessions
        .record_turn(&session_id, &body.message, response.display_text())
        .await;

    let encode = |audio: &Option<Vec<u8>>| audio.as_ref().map(|a| BASE64.encode(a));
    let mut payload = match &response {
        AssistantResponse::Audio {
            voice_text,
            detailed_text,
            audio,
        } => json!({
            "session_id": session_id,
            "type": "audio",
            "voice_text": voice_text,
            "text": detailed_text,
            "audio_base64": encode(audio),
        }),
        AssistantResponse::Text { text, audio } => json!({
            "session_id": session_id,
            "type": "text",
            "text": text,
            "audio_base64": encode(audio),
        }),
        AssistantResponse::Error(_) => Value::Null,
    };
    if let (Some(persona), Some(fields)) = (&persona, payload.as_object_mut()) {
        fields.insert("persona".to_string(), json!(persona.label()));
    }
    (StatusCode::OK, Json(payload)).into_response()
}

async fn clear_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    if state.sessions.clear(&session_id).await {
        (StatusCode::OK, Json(json!({ "status": "cleared" }))).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Session not found")
    }
}

// ── Upload ──────────────────────────────────────────────────────────────

fn safe_file_name(raw: &str) -> Option<String> {
    let name = FsPath::new(raw).file_name()?.to_str()?.trim();
    (!name.is_empty() && !name.starts_with('.')).then(|| name.to_string())
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No file field in upload"),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
        };
        if field.name() != Some("file") {
            continue;
        }

        let Some(name) = field.file_name().and_then(safe_file_name) else {
            return error_response(StatusCode::BAD_REQUEST, "Upload has no usable file name");
        };
        if !state.config.is_allowed_file(&name) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!(
                    "File type not allowed. Allowed: {}",
                    state.config.allowed_extensions.join(", ")
                ),
            );
        }

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return error_response(e.status(), e.body_text()),
        };
        if data.len() as u64 > state.config.max_file_size {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File exceeds the {} byte limit", state.config.max_file_size),
            );
        }

        let dir = &state.config.upload_dir;
        let path = dir.join(format!("{}_{name}", Uuid::new_v4().simple()));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &data).await
        };
        if let Err(e) = written.await {
            warn!(path = %path.display(), error = %e, "Failed to store upload");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store file");
        }

        info!(name = %name, bytes = data.len(), "Stored upload");
        return (StatusCode::CREATED, Json(UploadedFile { name, path })).into_response();
    }
}

// ── Voice ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TranscribeParams {
    filename: Option<String>,
}

async fn transcribe(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Audio body is empty");
    }
    let filename = params.filename.as_deref().unwrap_or(DEFAULT_AUDIO_NAME);
    match state.speech.transcribe(body.to_vec(), filename).await {
        Ok(text) => (StatusCode::OK, Json(json!({ "text": text }))).into_response(),
        Err(e) => {
            warn!(error = %e, "Transcription failed");
            error_response(integration_status(&e), e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default = "default_speed")]
    speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

async fn speak(State(state): State<AppState>, Json(body): Json<SpeakRequest>) -> Response {
    match state.speech.synthesize(&body.text, body.speed).await {
        Ok(audio) => (
            StatusCode::OK,
            Json(json!({ "audio_base64": BASE64.encode(audio) })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Speech synthesis failed");
            error_response(integration_status(&e), e.to_string())
        }
    }
}

// ── Tools and agents ────────────────────────────────────────────────────

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.tools().openai_function_specs().await)
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agents.list_agents().await)
}

#[derive(Debug, Deserialize)]
struct AgentMessageRequest {
    sender: Option<String>,
    #[serde(default = "default_message_type")]
    message_type: MessageType,
    #[serde(default)]
    content: Value,
    metadata: Option<Map<String, Value>>,
}

fn default_message_type() -> MessageType {
    MessageType::Query
}

async fn send_agent_message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<AgentMessageRequest>,
) -> Response {
    let sender = body.sender.as_deref().unwrap_or(USER_AGENT_ID);
    match state
        .agents
        .send_message(sender, &agent_id, body.message_type, body.content, body.metadata)
        .await
    {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e @ AgentError::UnknownAgent(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
