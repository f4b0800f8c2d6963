use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    error::AgentError,
    session::{SessionError, SessionSnapshot, SharedSession},
};

pub const INPUT_PLACEHOLDER: &str = "Ask about Indian Budget 2024";

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
}

#[derive(Serialize)]
pub struct SessionCreated {
    session_id: Uuid,
}

#[derive(Serialize)]
pub struct AppInfo {
    title: String,
    placeholder: &'static str,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/info", get(info_handler))
        .route("/api/status", get(status_handler))
        .route("/api/reload", post(reload_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/:id/messages", get(messages_handler))
        .route("/api/sessions/:id/chat", post(chat_handler))
        .route("/api/sessions/:id/cancel", post(cancel_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn info_handler(State(state): State<AppState>) -> Json<AppInfo> {
    Json(AppInfo {
        title: state.config.app_title.clone(),
        placeholder: INPUT_PLACEHOLDER,
    })
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let ready = state.agents.is_ready().await;
    let building = state.agents.is_building();
    let message = if ready {
        "Agente listo."
    } else if building {
        "Construyendo índices y agente..."
    } else {
        "El agente se construirá en la próxima consulta."
    };
    Json(Status {
        ready,
        building,
        message: message.to_string(),
        sessions: state.sessions.len().await,
    })
}

#[axum::debug_handler]
async fn reload_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    info!("Petición de recarga del agente recibida.");
    state.agents.invalidate().await;
    state.agents.get().await.map_err(|e| {
        error!("Error reconstruyendo el agente: {}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, format!("No se pudo reconstruir el agente: {e}"))
    })?;
    Ok((StatusCode::OK, Json(json!({ "message": "Agente reconstruido." }))))
}

#[axum::debug_handler]
async fn create_session_handler(State(state): State<AppState>) -> Json<SessionCreated> {
    let session_id = state.sessions.create().await;
    info!(%session_id, "Nueva sesión de chat");
    Json(SessionCreated { session_id })
}

#[axum::debug_handler]
async fn messages_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = find_session(&state, &id).await?;
    let snapshot = SessionSnapshot::from(&*session.lock().await);
    Ok(Json(snapshot))
}

#[axum::debug_handler]
async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &id).await?;
    if session.lock().await.request_cancel() {
        info!(session_id = %id, "Turno cancelado por el usuario");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(session_error(SessionError::NoTurnInProgress))
    }
}

/// Un turno de chat como stream SSE: `user` → `token`* → `done` | `error`.
#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChatPayload>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = find_session(&state, &id).await?;
    let agent = state.agents.get().await.map_err(|e| {
        let e = AgentError::Unavailable(e.to_string());
        error!("{}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    let question = payload.message.trim().to_string();
    let mut response = {
        let mut guard = session.lock().await;
        guard.submit(&question).map_err(session_error)?;
        let response = agent.stream_chat(&question);
        guard
            .start_streaming(response.abort_handle())
            .map_err(session_error)?;
        response
    };

    let mut turn = OpenTurn::new(session.clone());
    let stream = async_stream::stream! {
        yield Ok(sse_event("user", json!({ "content": question })));

        let mut failure = None;
        while let Some(item) = response.next().await {
            match item {
                Ok(fragment) => {
                    if session.lock().await.push_fragment(&fragment).is_err() {
                        break;
                    }
                    yield Ok(sse_event("token", json!({ "text": fragment })));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if response.is_aborted() {
            info!(session_id = %id, "Turno cancelado; se conserva la respuesta parcial");
        }
        match failure {
            Some(e) => {
                error!(session_id = %id, "Error durante el turno: {}", e);
                session.lock().await.fail();
                turn.close();
                yield Ok(sse_event("error", json!({ "message": e.to_string() })));
            }
            None => {
                let closed = session.lock().await.complete();
                turn.close();
                match closed {
                    Ok(text) => {
                        yield Ok(sse_event("done", json!({ "content": text })));
                    }
                    Err(e) => {
                        yield Ok(sse_event("error", json!({ "message": e.to_string() })));
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

// --- Utilidades ---

/// Turno abierto por un stream SSE. Si el cliente se desconecta antes del
/// final (incluso antes del primer poll), el stream se descarta y el turno se
/// cierra como cancelado.
struct OpenTurn {
    session: Option<SharedSession>,
}

impl OpenTurn {
    fn new(session: SharedSession) -> Self {
        Self { session: Some(session) }
    }

    fn close(&mut self) {
        self.session = None;
    }
}

impl Drop for OpenTurn {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Cliente desconectado con un turno en curso; se cancela.");
            tokio::spawn(async move {
                if let Err(e) = session.lock().await.cancel() {
                    debug!("El turno ya estaba cerrado al desconectarse el cliente: {}", e);
                }
            });
        }
    }
}

fn sse_event(name: &str, data: Value) -> Event {
    Event::default().event(name).data(data.to_string())
}

async fn find_session(state: &AppState, id: &Uuid) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "La sesión no existe."))
}

fn session_error(e: SessionError) -> ApiError {
    let status = match e {
        SessionError::EmptyMessage => StatusCode::BAD_REQUEST,
        SessionError::TurnInProgress | SessionError::NoTurnInProgress => StatusCode::CONFLICT,
    };
    api_error(status, e.to_string())
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}
