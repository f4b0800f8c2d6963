//! Abstracción sobre el proveedor de LLM.
//!
//! Tres costuras, cada una con su implementación real y sustituible en tests:
//!   - [`EmbeddingProvider`]: embeddings por lotes (Rig + OpenAI).
//!   - [`CompletionProvider`]: una respuesta completa a un prompt (Rig + OpenAI).
//!   - [`ChatModel`]: chat en streaming con llamadas a herramientas
//!     (ver `openai_chat`).

use async_trait::async_trait;
use futures::stream::BoxStream;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel as _;
use serde::Serialize;

use crate::config::AppConfig;
use crate::error::LlmError;

const PROVIDER: &str = "OpenAI";

// ---------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Un vector por texto, en el mismo orden. Cada invocación es una
    /// llamada (de pago) al proveedor.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::protocol(PROVIDER, "respuesta de embeddings vacía"))
    }

    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Llamada a herramienta ya completa, tal y como la pidió el modelo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON crudo de los argumentos.
    pub arguments: String,
}

/// Mensaje de la conversación que se envía al modelo de chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurn {
    System(String),
    User(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

/// Definición de función que se ofrece al modelo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Fragmento incremental de la salida del modelo.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    /// Trozo de una llamada a herramienta; los trozos con el mismo `index`
    /// se concatenan.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = BoxStream<'static, Result<ChatDelta, LlmError>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(&self, turns: &[ChatTurn], tools: &[ToolSpec]) -> Result<DeltaStream, LlmError>;
}

// ---------------------------------------------------------------------
// IMPLEMENTACIÓN CON RIG
// ---------------------------------------------------------------------

/// Gestor de LLMs y embeddings sobre el cliente OpenAI de Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
}

impl LlmManager {
    /// Gestor para el modelo de QA (agente y motor vectorial).
    pub fn qa_from_config(cfg: &AppConfig) -> Self {
        Self {
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_qa_model.clone(),
            temperature: 0.1,
        }
    }

    /// Gestor para el modelo de resumen.
    pub fn summary_from_config(cfg: &AppConfig) -> Self {
        Self {
            chat_model: cfg.llm_summary_model.clone(),
            ..Self::qa_from_config(cfg)
        }
    }

    fn client() -> rig::providers::openai::Client {
        use rig::client::ProviderClient as _;
        // La clave ya se validó al cargar la configuración.
        rig::providers::openai::Client::from_env()
    }
}

#[async_trait]
impl EmbeddingProvider for LlmManager {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        use rig::client::EmbeddingsClient as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.embedding_model,
            "calculando embeddings"
        );

        let embedding_model = Self::client().embedding_model(&self.embedding_model);
        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| LlmError::upstream(PROVIDER, e))?;

        if embeddings.len() != texts.len() {
            return Err(LlmError::protocol(
                PROVIDER,
                format!(
                    "número de embeddings ({}) distinto al número de textos ({})",
                    embeddings.len(),
                    texts.len()
                ),
            ));
        }

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl CompletionProvider for LlmManager {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        use rig::client::CompletionClient as _;

        let agent = Self::client()
            .agent(&self.chat_model)
            .preamble(system)
            .temperature(self.temperature)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::upstream(PROVIDER, e))
    }
}
