//! Tipos de error de la aplicación, agrupados por el momento en que se producen:
//! arranque (configuración, carga de documentos, índices) o turno de chat
//! (llamadas al proveedor LLM, agente).

use std::path::PathBuf;
use thiserror::Error;

/// Errores de configuración. Siempre fatales en el arranque.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Falta OPENAI_API_KEY en el entorno o en .env")]
    MissingApiKey,

    #[error("Valor inválido para {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errores del cargador de documentos.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("La ruta no es un directorio legible: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("No se encontró ningún documento utilizable en {}", .0.display())]
    Empty(PathBuf),

    #[error("Error leyendo {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("La tarea de extracción de documentos terminó de forma inesperada: {0}")]
    Task(String),
}

/// Errores al construir, persistir o recargar los índices.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Error de E/S en el índice persistido {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Índice persistido corrupto en {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Número de embeddings ({got}) distinto al número de nodos ({expected})")]
    EmbeddingCount { expected: usize, got: usize },
}

/// Errores del proveedor LLM (red, autenticación, límites de uso, respuestas inesperadas).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Error del proveedor ({provider}): {message}")]
    Upstream { provider: String, message: String },

    #[error("Respuesta inesperada del proveedor ({provider}): {message}")]
    Protocol { provider: String, message: String },
}

impl LlmError {
    pub fn upstream(provider: &str, message: impl ToString) -> Self {
        Self::Upstream {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    pub fn protocol(provider: &str, message: impl ToString) -> Self {
        Self::Protocol {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }
}

/// Fallo de un turno de chat. Termina el turno en curso, nunca el proceso.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("La herramienta '{tool}' falló: {source}")]
    Tool {
        tool: String,
        #[source]
        source: LlmError,
    },

    #[error("El agente no está disponible: {0}")]
    Unavailable(String),
}
