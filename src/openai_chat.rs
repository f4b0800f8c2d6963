//! Cliente de chat en streaming contra `/chat/completions` de OpenAI, con
//! soporte de function calling.
//!
//! La respuesta llega como Server-Sent Events; cada evento es un
//! `chat.completion.chunk` que se traduce a [`ChatDelta`]s.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use crate::config::AppConfig;
use crate::error::LlmError;
use crate::llm::{ChatDelta, ChatModel, ChatTurn, DeltaStream, ToolSpec};

const PROVIDER: &str = "OpenAI";

pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: Url,
    model: String,
    temperature: f64,
}

impl OpenAiChatModel {
    pub fn new(api_key: impl Into<String>, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url,
            model: model.into(),
            temperature: 0.1,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.openai_api_key.clone(),
            cfg.openai_base_url.clone(),
            cfg.llm_qa_model.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Cuerpo JSON de la petición.
    pub fn request_body(&self, turns: &[ChatTurn], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": turns.iter().map(turn_to_json).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn turn_to_json(turn: &ChatTurn) -> Value {
    match turn {
        ChatTurn::System(content) => json!({ "role": "system", "content": content }),
        ChatTurn::User(content) => json!({ "role": "user", "content": content }),
        ChatTurn::Assistant { content, tool_calls } => {
            let mut msg = json!({
                "role": "assistant",
                "content": if content.is_empty() { Value::Null } else { json!(content) },
            });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect();
            }
            msg
        }
        ChatTurn::Tool { call_id, content } => {
            json!({ "role": "tool", "tool_call_id": call_id, "content": content })
        }
    }
}

// ── Tipos de la respuesta en streaming ─────────────────────────────

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Deserialize)]
struct ToolCallChunk {
    index: usize,
    id: Option<String>,
    function: Option<FunctionChunk>,
}

#[derive(Deserialize)]
struct FunctionChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Traduce el `data` de un evento SSE a deltas. Los fragmentos de texto
/// vacíos se descartan.
pub fn parse_chunk(data: &str) -> Result<Vec<ChatDelta>, LlmError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::protocol(PROVIDER, format!("chunk ilegible: {e}")))?;

    let mut deltas = Vec::new();
    for delta in chunk.choices.into_iter().filter_map(|c| c.delta) {
        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            deltas.push(ChatDelta::Text(text));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            deltas.push(ChatDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    Ok(deltas)
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream(&self, turns: &[ChatTurn], tools: &[ToolSpec]) -> Result<DeltaStream, LlmError> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            messages = turns.len(),
            tools = tools.len(),
            "abriendo stream de chat"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(turns, tools))
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "fallo en la petición de chat");
                LlmError::upstream(PROVIDER, format!("fallo en la petición: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(provider = PROVIDER, %status, "error de la API de chat");
            return Err(LlmError::upstream(PROVIDER, format!("la API devolvió {status}: {detail}")));
        }

        let mut events = response.bytes_stream().eventsource();
        let stream = async_stream::try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| LlmError::upstream(PROVIDER, format!("stream interrumpido: {e}")))?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                for delta in parse_chunk(&event.data)? {
                    yield delta;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
