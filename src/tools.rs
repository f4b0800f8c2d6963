//! Registro fijo de herramientas que se ofrecen al agente.
//!
//! Cada herramienta envuelve un motor de consulta con un nombre y una
//! descripción. La descripción la lee el modelo para decidir qué herramienta
//! usar, así que forma parte del comportamiento, no de la documentación.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::AgentError,
    llm::ToolSpec,
    query_engine::QueryEngine,
};

pub const VECTOR_TOOL: &str = "vector_tool";
pub const SUMMARY_TOOL: &str = "summary_tool";

const VECTOR_TOOL_DESCRIPTION: &str =
    "Useful for questions related to specific aspects of Indian Budget 2024.";
const SUMMARY_TOOL_DESCRIPTION: &str =
    "Useful for any requests that require a holistic summary of the Indian Budget 2024. \
     For questions that require more specific sections, please use the vector_tool.";

/// Argumentos de las herramientas de consulta.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryArgs {
    /// Pregunta en lenguaje natural que se envía al motor de consulta.
    pub input: String,
}

pub struct QueryEngineTool {
    name: &'static str,
    description: &'static str,
    engine: Arc<dyn QueryEngine>,
}

impl QueryEngineTool {
    fn spec(&self) -> ToolSpec {
        let mut parameters = schemars::schema_for!(QueryArgs).to_value();
        if let Value::Object(map) = &mut parameters {
            map.remove("$schema");
            map.remove("title");
        }
        ToolSpec {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters,
        }
    }
}

pub struct ToolRegistry {
    tools: Vec<QueryEngineTool>,
}

impl ToolRegistry {
    /// Las dos herramientas del agente, en orden fijo.
    pub fn new(vector_engine: Arc<dyn QueryEngine>, summary_engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            tools: vec![
                QueryEngineTool {
                    name: VECTOR_TOOL,
                    description: VECTOR_TOOL_DESCRIPTION,
                    engine: vector_engine,
                },
                QueryEngineTool {
                    name: SUMMARY_TOOL,
                    description: SUMMARY_TOOL_DESCRIPTION,
                    engine: summary_engine,
                },
            ],
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(QueryEngineTool::spec).collect()
    }

    /// Ejecuta una herramienta con los argumentos crudos que envió el modelo.
    ///
    /// Un nombre desconocido o unos argumentos ilegibles no terminan el turno:
    /// el texto de error vuelve al modelo como resultado. Un fallo del motor
    /// de consulta sí lo termina.
    pub async fn call(&self, name: &str, raw_args: &str) -> Result<String, AgentError> {
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            warn!(tool = name, "el modelo pidió una herramienta inexistente");
            return Ok(format!("Error: tool '{name}' does not exist."));
        };

        let input = match parse_input(raw_args) {
            Some(input) => input,
            None => {
                warn!(tool = name, args = raw_args, "argumentos de herramienta ilegibles");
                return Ok(format!(
                    "Error: invalid arguments for '{name}'. Expected {{\"input\": \"<question>\"}}."
                ));
            }
        };

        info!(tool = name, input = %input, "=== Calling Function ===");
        let output = tool.engine.query(&input).await.map_err(|source| AgentError::Tool {
            tool: name.to_string(),
            source,
        })?;
        info!(tool = name, output_len = output.len(), "=== Function Output ===");
        Ok(output)
    }
}

/// `{"input": "..."}`, o un string JSON / texto plano como entrada directa.
fn parse_input(raw: &str) -> Option<String> {
    if let Ok(args) = serde_json::from_str::<QueryArgs>(raw) {
        return Some(args.input);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Ok(_) => None,
        Err(_) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Err(_) => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Motor de consulta falso que registra las preguntas recibidas.
    pub(crate) struct LoggingEngine {
        pub label: &'static str,
        pub log: Arc<Mutex<Vec<(String, String)>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl QueryEngine for LoggingEngine {
        async fn query(&self, question: &str) -> Result<String, LlmError> {
            self.log
                .lock()
                .unwrap()
                .push((self.label.to_string(), question.to_string()));
            if self.fail {
                return Err(LlmError::upstream("OpenAI", "429 rate limit"));
            }
            Ok(format!("{} says: {question}", self.label))
        }
    }

    pub(crate) fn logging_registry(fail: bool) -> (ToolRegistry, Arc<Mutex<Vec<(String, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ToolRegistry::new(
            Arc::new(LoggingEngine { label: VECTOR_TOOL, log: log.clone(), fail }),
            Arc::new(LoggingEngine { label: SUMMARY_TOOL, log: log.clone(), fail }),
        );
        (registry, log)
    }

    #[test]
    fn exposes_exactly_the_two_fixed_tools() {
        let (registry, _) = logging_registry(false);
        let specs = registry.specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["vector_tool", "summary_tool"]);
        assert!(specs[1].description.contains("holistic summary"));
        assert!(specs[1].description.contains("please use the vector_tool"));
        assert_eq!(specs[0].parameters["type"], "object");
        assert!(specs[0].parameters["properties"]["input"].is_object());
        assert_eq!(specs[0].parameters["required"][0], "input");
        assert!(specs[0].parameters.get("$schema").is_none());
    }

    #[tokio::test]
    async fn routes_calls_by_name() {
        let (registry, log) = logging_registry(false);
        let out = registry
            .call(SUMMARY_TOOL, r#"{"input":"budget 2024 overview"}"#)
            .await
            .unwrap();
        assert_eq!(out, "summary_tool says: budget 2024 overview");
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[(SUMMARY_TOOL.to_string(), "budget 2024 overview".to_string())]
        );
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_go_back_to_the_model() {
        let (registry, log) = logging_registry(false);
        let out = registry.call("weather_tool", "{}").await.unwrap();
        assert!(out.contains("does not exist"));
        let out = registry.call(VECTOR_TOOL, r#"{"query": 3}"#).await.unwrap();
        assert!(out.contains("invalid arguments"));
        assert!(log.lock().unwrap().is_empty());

        let out = registry.call(VECTOR_TOOL, "fiscal deficit").await.unwrap();
        assert_eq!(out, "vector_tool says: fiscal deficit");
    }

    #[tokio::test]
    async fn engine_failures_end_the_turn() {
        let (registry, _) = logging_registry(true);
        let err = registry.call(VECTOR_TOOL, r#"{"input":"x"}"#).await.unwrap_err();
        assert!(matches!(err, AgentError::Tool { ref tool, .. } if tool == VECTOR_TOOL));
    }
}
