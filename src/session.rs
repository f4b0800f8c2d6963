//! Estado de las sesiones de chat.
//!
//! Cada sesión es propiedad de un único cliente (su id sólo lo conoce quien
//! la creó) y guarda el historial en memoria mientras viva el proceso.
//! Máquina de estados por turno:
//!
//! `Idle` → `UserSubmitted` → `Streaming` → `Idle`

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::AbortHandle;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::{ChatMessage, Role};

/// Marca visual que se añade al texto parcial mientras llega la respuesta.
pub const CURSOR: &str = "▌";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    UserSubmitted,
    Streaming,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("El mensaje está vacío")]
    EmptyMessage,
    #[error("Ya hay un turno en curso en esta sesión")]
    TurnInProgress,
    #[error("No hay ningún turno en curso")]
    NoTurnInProgress,
}

#[derive(Debug)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    state: TurnState,
    partial: String,
    abort: Option<AbortHandle>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            state: TurnState::Idle,
            partial: String::new(),
            abort: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Idle → UserSubmitted: guarda el mensaje del usuario.
    pub fn submit(&mut self, text: &str) -> Result<(), SessionError> {
        if self.state != TurnState::Idle {
            return Err(SessionError::TurnInProgress);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.messages.push(ChatMessage::user(text));
        self.partial.clear();
        self.state = TurnState::UserSubmitted;
        Ok(())
    }

    /// UserSubmitted → Streaming. El `AbortHandle` permite cancelar el turno
    /// desde otra petición.
    pub fn start_streaming(&mut self, abort: AbortHandle) -> Result<(), SessionError> {
        if self.state != TurnState::UserSubmitted {
            return Err(SessionError::NoTurnInProgress);
        }
        self.abort = Some(abort);
        self.state = TurnState::Streaming;
        Ok(())
    }

    pub fn push_fragment(&mut self, fragment: &str) -> Result<(), SessionError> {
        if self.state != TurnState::Streaming {
            return Err(SessionError::NoTurnInProgress);
        }
        self.partial.push_str(fragment);
        Ok(())
    }

    /// Texto parcial con el cursor, o `None` si no hay respuesta en curso.
    pub fn render_partial(&self) -> Option<String> {
        (self.state == TurnState::Streaming).then(|| format!("{}{CURSOR}", self.partial))
    }

    /// Streaming → Idle: el texto acumulado pasa al historial.
    pub fn complete(&mut self) -> Result<String, SessionError> {
        if self.state != TurnState::Streaming {
            return Err(SessionError::NoTurnInProgress);
        }
        let full = std::mem::take(&mut self.partial);
        self.messages.push(ChatMessage::assistant(full.clone()));
        self.finish_turn();
        Ok(full)
    }

    /// Pide la cancelación del turno en curso. El turno se cierra con lo
    /// recibido hasta ese momento cuando el stream termina.
    pub fn request_cancel(&mut self) -> bool {
        match (&self.abort, self.state) {
            (Some(handle), TurnState::Streaming) => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Cancela y cierra el turno en el acto, conservando el texto parcial
    /// como respuesta del asistente.
    pub fn cancel(&mut self) -> Result<String, SessionError> {
        if let Some(handle) = &self.abort {
            handle.abort();
        }
        self.complete()
    }

    /// Cierra un turno fallido: se retira el mensaje del usuario para que el
    /// historial siga alternando usuario/asistente.
    pub fn fail(&mut self) {
        if self.state == TurnState::Idle {
            return;
        }
        if matches!(self.messages.last(), Some(m) if m.role == Role::User) {
            self.messages.pop();
        }
        self.partial.clear();
        self.finish_turn();
    }

    fn finish_turn(&mut self) {
        self.abort = None;
        self.state = TurnState::Idle;
    }
}

/// Vista serializable de una sesión.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub state: TurnState,
    pub partial: Option<String>,
}

impl From<&ChatSession> for SessionSnapshot {
    fn from(session: &ChatSession) -> Self {
        Self {
            messages: session.messages.clone(),
            state: session.state,
            partial: session.render_partial(),
        }
    }
}

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Sesiones por id. Nunca se comparte una sesión entre clientes.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionStore {
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(ChatSession::new())));
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
