//! Agente de preguntas y respuestas sobre el Presupuesto 2024.
//!
//! Cada turno es independiente: el agente no guarda memoria entre turnos (el
//! historial vive en la sesión de chat). Dentro de un turno:
//!   1. Se envía `[sistema, usuario]` al modelo junto con las herramientas.
//!   2. El texto que llega se reenvía fragmento a fragmento.
//!   3. Si el modelo pide herramientas, se ejecutan y sus resultados vuelven
//!      al modelo; se repite hasta que responde sólo con texto.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{AbortHandle, Abortable, BoxStream};
use futures::{Stream, StreamExt};
use tracing::{debug, info};

use crate::{
    error::AgentError,
    llm::{ChatDelta, ChatModel, ChatTurn, ToolCall},
    tools::ToolRegistry,
};

pub const SYSTEM_PROMPT: &str = "\
You are a specialized agent designed to answer queries about the Indian Budget for the year 2024.
You also have access to the 2023 budget speech, so you can compare both budgets and answer questions using that context.
You must use at least one of the tools provided when answering a question about the Indian Budget for the year 2024.
If you are asked about anything other than this topic, DO NOT ANSWER it; instead tell the user who you are and what you can help with.
Be as helpful as you can and structure answers for readability with headings, bullet points, tables, etc.
Whenever a comparison is asked, answer with a table.
You have no ties with the Indian government; you are just an AI agent that helps answer questions related to the Indian Budget.
Be respectful to the user, the government, the budget and everyone else.";

/// Secuencia perezosa de fragmentos de texto de una respuesta, cancelable
/// desde fuera con su [`AbortHandle`].
pub struct ResponseStream {
    inner: Abortable<BoxStream<'static, Result<String, AgentError>>>,
    handle: AbortHandle,
}

impl ResponseStream {
    pub fn new(stream: BoxStream<'static, Result<String, AgentError>>) -> Self {
        let (inner, handle) = futures::stream::abortable(stream);
        Self { inner, handle }
    }

    /// Al abortar, el stream termina en el siguiente poll y la generación en
    /// curso se descarta.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.is_aborted()
    }

    /// Concatena todos los fragmentos en orden de emisión.
    pub async fn collect_text(mut self) -> Result<String, AgentError> {
        let mut full = String::new();
        while let Some(fragment) = self.next().await {
            full.push_str(&fragment?);
        }
        Ok(full)
    }
}

impl Stream for ResponseStream {
    type Item = Result<String, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Agrupa los trozos de llamadas a herramientas por índice.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let call = self.calls.entry(index).or_insert_with(|| ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name.push_str(&name);
        }
        call.arguments.push_str(arguments);
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call
            })
            .collect()
    }
}

pub struct BudgetAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_tool_rounds: usize,
}

impl BudgetAgent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>, max_tool_rounds: usize) -> Self {
        Self {
            model,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_tool_rounds,
        }
    }

    /// Lanza un turno de chat. Nada se envía al modelo hasta el primer poll.
    pub fn stream_chat(&self, user_text: &str) -> ResponseStream {
        let model = Arc::clone(&self.model);
        let tools = Arc::clone(&self.tools);
        let max_rounds = self.max_tool_rounds;
        let mut turns = vec![
            ChatTurn::System(self.system_prompt.clone()),
            ChatTurn::User(user_text.to_string()),
        ];

        info!(chars = user_text.len(), "Nuevo turno de chat");

        let stream = async_stream::try_stream! {
            let mut round = 0;
            loop {
                // Agotadas las rondas, el modelo debe contestar con texto.
                let specs = if round < max_rounds { tools.specs() } else { Vec::new() };
                let mut deltas = model.stream(&turns, &specs).await.map_err(AgentError::from)?;

                let mut text = String::new();
                let mut pending = ToolCallAccumulator::default();
                while let Some(delta) = deltas.next().await {
                    match delta.map_err(AgentError::from)? {
                        ChatDelta::Text(fragment) => {
                            text.push_str(&fragment);
                            yield fragment;
                        }
                        ChatDelta::ToolCall { index, id, name, arguments } => {
                            pending.push(index, id, name, &arguments);
                        }
                    }
                }

                let calls = pending.finish();
                if calls.is_empty() || round >= max_rounds {
                    debug!(rounds = round, "Turno completado");
                    break;
                }

                turns.push(ChatTurn::Assistant { content: text, tool_calls: calls.clone() });
                for call in calls {
                    let output = tools.call(&call.name, &call.arguments).await?;
                    turns.push(ChatTurn::Tool { call_id: call.id, content: output });
                }
                round += 1;
            }
        };

        ResponseStream::new(Box::pin(stream))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{DeltaStream, ToolSpec};
    use crate::tools::tests::logging_registry;
    use crate::tools::SUMMARY_TOOL;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Script = dyn Fn(&[ChatTurn], &[ToolSpec]) -> Result<Vec<ChatDelta>, LlmError> + Send + Sync;

    /// Modelo de chat guionizado: decide la respuesta a partir de la
    /// conversación y guarda cada petición recibida.
    pub(crate) struct ScriptedModel {
        script: Box<Script>,
        pub requests: Mutex<Vec<(Vec<ChatTurn>, usize)>>,
    }

    impl ScriptedModel {
        pub(crate) fn new<F>(script: F) -> Self
        where
            F: Fn(&[ChatTurn], &[ToolSpec]) -> Result<Vec<ChatDelta>, LlmError> + Send + Sync + 'static,
        {
            Self { script: Box::new(script), requests: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn stream(&self, turns: &[ChatTurn], tools: &[ToolSpec]) -> Result<DeltaStream, LlmError> {
            self.requests.lock().unwrap().push((turns.to_vec(), tools.len()));
            let deltas = (self.script)(turns, tools)?;
            Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
        }
    }

    fn text(parts: &[&str]) -> Vec<ChatDelta> {
        parts.iter().map(|p| ChatDelta::Text(p.to_string())).collect()
    }

    fn user_text(turns: &[ChatTurn]) -> String {
        turns
            .iter()
            .find_map(|t| match t {
                ChatTurn::User(u) => Some(u.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn has_tool_result(turns: &[ChatTurn]) -> bool {
        turns.iter().any(|t| matches!(t, ChatTurn::Tool { .. }))
    }

    /// Se comporta como el modelo real: resúmenes con `summary_tool`,
    /// preguntas concretas con `vector_tool`, y rechazo fuera de tema.
    pub(crate) fn budget_script() -> ScriptedModel {
        ScriptedModel::new(|turns, tools| {
            let question = user_text(turns).to_lowercase();
            if has_tool_result(turns) {
                return Ok(text(&["The 2024 budget ", "prioritises ", "capital expenditure."]));
            }
            if !question.contains("budget") {
                return Ok(text(&[
                    "I am an AI agent specialised in the Indian Budget 2024. ",
                    "I can't help with that question.",
                ]));
            }
            assert!(!tools.is_empty());
            let tool = if question.contains("summar") { "summary_tool" } else { "vector_tool" };
            Ok(vec![
                ChatDelta::ToolCall {
                    index: 0,
                    id: Some("call_abc".into()),
                    name: Some(tool.into()),
                    arguments: String::new(),
                },
                ChatDelta::ToolCall { index: 0, id: None, name: None, arguments: "{\"input\":".into() },
                ChatDelta::ToolCall { index: 0, id: None, name: None, arguments: "\"2024 budget\"}".into() },
            ])
        })
    }

    fn agent_with(model: ScriptedModel, max_rounds: usize) -> (BudgetAgent, Arc<ScriptedModel>, Arc<Mutex<Vec<(String, String)>>>) {
        let (registry, log) = logging_registry(false);
        let model = Arc::new(model);
        let agent = BudgetAgent::new(model.clone(), Arc::new(registry), max_rounds);
        (agent, model, log)
    }

    #[tokio::test]
    async fn summary_questions_use_the_summary_tool() {
        let (agent, model, log) = agent_with(budget_script(), 5);
        let answer = agent.stream_chat("Summarize the 2024 budget").collect_text().await.unwrap();

        assert_eq!(answer, "The 2024 budget prioritises capital expenditure.");
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[(SUMMARY_TOOL.to_string(), "2024 budget".to_string())]
        );

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1, 2);
        let second = &requests[1].0;
        assert!(matches!(&second[2], ChatTurn::Assistant { tool_calls, .. } if tool_calls[0].id == "call_abc"));
        assert!(matches!(&second[3], ChatTurn::Tool { call_id, content } if call_id == "call_abc" && content.starts_with("summary_tool says")));
    }

    #[tokio::test]
    async fn off_topic_questions_are_declined_without_tools() {
        let (agent, _, log) = agent_with(budget_script(), 5);
        let answer = agent.stream_chat("What's the weather today?").collect_text().await.unwrap();
        assert!(answer.contains("I am an AI agent specialised in the Indian Budget 2024"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn final_text_is_the_concatenation_of_fragments() {
        let (agent, _, _) = agent_with(budget_script(), 5);
        let fragments: Vec<String> = agent
            .stream_chat("What is the fiscal deficit in the budget?")
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["The 2024 budget ", "prioritises ", "capital expenditure."]);

        let (agent, _, _) = agent_with(budget_script(), 5);
        let full = agent
            .stream_chat("What is the fiscal deficit in the budget?")
            .collect_text()
            .await
            .unwrap();
        assert_eq!(full, fragments.concat());
    }

    #[tokio::test]
    async fn upstream_failures_end_the_turn() {
        let (agent, _, _) = agent_with(
            ScriptedModel::new(|_, _| Err(LlmError::upstream("OpenAI", "401 invalid api key"))),
            5,
        );
        let err = agent.stream_chat("Summarize the budget").collect_text().await.unwrap_err();
        assert!(err.to_string().contains("401"));

        let (registry, _) = logging_registry(true);
        let agent = BudgetAgent::new(Arc::new(budget_script()), Arc::new(registry), 5);
        let err = agent.stream_chat("Summarize the budget").collect_text().await.unwrap_err();
        assert!(matches!(err, AgentError::Tool { .. }));
    }

    #[tokio::test]
    async fn tool_rounds_are_bounded() {
        let (agent, model, log) = agent_with(
            ScriptedModel::new(|_, tools| {
                if tools.is_empty() {
                    return Ok(text(&["Done."]));
                }
                Ok(vec![ChatDelta::ToolCall {
                    index: 0,
                    id: None,
                    name: Some("vector_tool".into()),
                    arguments: "{\"input\":\"again\"}".into(),
                }])
            }),
            2,
        );
        let answer = agent.stream_chat("budget loop").collect_text().await.unwrap();
        assert_eq!(answer, "Done.");
        assert_eq!(log.lock().unwrap().len(), 2);
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![2, 2, 0]);
    }

    #[tokio::test]
    async fn aborted_streams_stop_yielding() {
        let (agent, _, _) = agent_with(budget_script(), 5);
        let mut stream = agent.stream_chat("Summarize the 2024 budget");
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "The 2024 budget ");
        stream.abort_handle().abort();
        assert!(stream.next().await.is_none());
        assert!(stream.is_aborted());
    }
}
