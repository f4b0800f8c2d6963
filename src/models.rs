//! Modelos de dominio: documentos fuente, nodos de texto y mensajes del chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadatos de origen de un documento, heredados por sus nodos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub file_path: String,
    pub file_name: String,
    /// Número de página (base 1) para PDFs; `None` para ficheros de texto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<u32>,
}

/// Texto extraído de un fichero (una página en el caso de los PDFs).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: SourceMetadata,
}

impl Document {
    /// El id es estable entre ejecuciones: depende sólo de la ruta y la página.
    pub fn new(text: String, metadata: SourceMetadata) -> Self {
        let key = match metadata.page_label {
            Some(page) => format!("{}#page={}", metadata.file_path, page),
            None => metadata.file_path.clone(),
        };
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string();
        Self { id, text, metadata }
    }
}

/// Trozo contiguo de texto de un documento. Unidad de recuperación compartida
/// por el índice vectorial y el índice de resumen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: SourceMetadata,
    /// Desplazamientos en bytes dentro del texto del documento.
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Node {
    /// Texto con la cabecera de origen, tal y como se le pasa al LLM.
    pub fn text_with_source(&self) -> String {
        match self.metadata.page_label {
            Some(page) => format!(
                "[{} · página {}]\n{}",
                self.metadata.file_name, page, self.text
            ),
            None => format!("[{}]\n{}", self.metadata.file_name, self.text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Un mensaje del historial de una sesión de chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
