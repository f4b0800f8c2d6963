//! Motores de consulta sobre los dos índices.
//!
//! Flujo vectorial:
//!   1. Embedding de la pregunta.
//!   2. Búsqueda de los `top_k` nodos más similares.
//!   3. El modelo de QA responde usando sólo ese contexto.
//!
//! Flujo de resumen (tree summarize):
//!   1. Todos los nodos, en orden, se empaquetan en lotes que caben en el
//!      presupuesto de contexto.
//!   2. Cada lote se responde por separado (con concurrencia acotada).
//!   3. Las respuestas parciales se vuelven a empaquetar hasta quedar una.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::{
    error::LlmError,
    llm::{CompletionProvider, EmbeddingProvider},
    splitter::split_long,
    summary_index::SummaryIndex,
    vector_store::VectorIndex,
};

/// Respuesta cuando no hay contexto que consultar.
pub const EMPTY_RESPONSE: &str = "Empty Response";

const SUMMARY_CONCURRENCY: usize = 4;

const QA_SYSTEM_PROMPT: &str = "You are an expert Q&A system that is trusted around the world.
Always answer the query using the provided context information, and not prior knowledge.
Some rules to follow:
1. Never directly reference the given context in your answer.
2. Avoid statements like 'Based on the context, ...' or 'The context information ...' or anything along those lines.";

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, question: &str) -> Result<String, LlmError>;
}

fn qa_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information is below.\n---------------------\n{context}\n---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\nAnswer: "
    )
}

fn summary_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information from multiple sources is below.\n---------------------\n{context}\n---------------------\n\
         Given the information from multiple sources and not prior knowledge, answer the query.\n\
         Query: {question}\nAnswer: "
    )
}

// ---------------------------------------------------------------------
// MOTOR VECTORIAL
// ---------------------------------------------------------------------

pub struct VectorQueryEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn CompletionProvider>,
    top_k: usize,
}

impl VectorQueryEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn CompletionProvider>,
        top_k: usize,
    ) -> Self {
        Self { index, embedder, llm, top_k }
    }
}

#[async_trait]
impl QueryEngine for VectorQueryEngine {
    async fn query(&self, question: &str) -> Result<String, LlmError> {
        if self.index.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let query_vec = self.embedder.embed(question).await?;
        let dimensions = self.index.metadata().dimensions;
        if query_vec.len() != dimensions {
            warn!(
                "La pregunta tiene {} dimensiones y el índice {}; ¿cambió LLM_EMBEDDING_MODEL?",
                query_vec.len(),
                dimensions
            );
            return Err(LlmError::protocol(
                self.embedder.model_name(),
                format!(
                    "el embedding de la pregunta tiene {} dimensiones y el índice persistido {}; \
                     borra el directorio de datos para reconstruirlo",
                    query_vec.len(),
                    dimensions
                ),
            ));
        }
        let hits = self.index.search(&query_vec, self.top_k);
        if hits.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        debug!(
            hits = hits.len(),
            best_score = hits[0].score,
            "contexto vectorial recuperado"
        );

        let context = hits
            .iter()
            .map(|h| h.node.text_with_source())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        self.llm.complete(QA_SYSTEM_PROMPT, &qa_prompt(&context, question)).await
    }
}

// ---------------------------------------------------------------------
// MOTOR DE RESUMEN
// ---------------------------------------------------------------------

pub struct SummaryQueryEngine {
    index: Arc<SummaryIndex>,
    llm: Arc<dyn CompletionProvider>,
    context_chars: usize,
}

impl SummaryQueryEngine {
    pub fn new(index: Arc<SummaryIndex>, llm: Arc<dyn CompletionProvider>, context_chars: usize) -> Self {
        Self {
            index,
            llm,
            context_chars: context_chars.max(1),
        }
    }

    async fn answer_batch(&self, question: &str, context: String) -> Result<String, LlmError> {
        self.llm
            .complete(QA_SYSTEM_PROMPT, &summary_prompt(&context, question))
            .await
    }
}

#[async_trait]
impl QueryEngine for SummaryQueryEngine {
    async fn query(&self, question: &str) -> Result<String, LlmError> {
        if self.index.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }
        let mut items: Vec<String> = self
            .index
            .nodes()
            .iter()
            .map(|n| n.text_with_source())
            .collect();

        let mut level = 0;
        loop {
            let batches = pack_batches(&items, self.context_chars);
            debug!(level, items = items.len(), batches = batches.len(), "tree summarize");
            // A partir del segundo nivel cada pasada debe reducir el número de
            // textos; si las respuestas parciales no caben, se falla.
            if level > 0 && batches.len() >= items.len() {
                return Err(LlmError::protocol(
                    "tree summarize",
                    format!(
                        "{} respuestas parciales no caben en lotes de {} caracteres",
                        items.len(),
                        self.context_chars
                    ),
                ));
            }

            let mut answers: Vec<String> = futures::stream::iter(batches)
                .map(|batch| self.answer_batch(question, batch))
                .buffered(SUMMARY_CONCURRENCY)
                .try_collect()
                .await?;

            if answers.len() == 1 {
                return Ok(answers.remove(0));
            }
            items = answers;
            level += 1;
        }
    }
}

/// Empaqueta los textos en orden en lotes de hasta `budget` caracteres.
/// Un texto que por sí solo excede el presupuesto se parte por palabras en
/// varios trozos consecutivos; nunca se descarta texto.
fn pack_batches(items: &[String], budget: usize) -> Vec<String> {
    const SEPARATOR: &str = "\n\n";

    let pieces = items.iter().flat_map(|item| {
        if item.chars().count() <= budget {
            return vec![item.as_str()];
        }
        warn!(
            "Texto de {} caracteres partido en trozos de hasta {}",
            item.chars().count(),
            budget
        );
        split_long(item, 0..item.len(), budget)
            .into_iter()
            .map(|range| &item[range])
            .collect()
    });

    let mut batches: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;
    for piece in pieces {
        let piece_len = piece.chars().count();
        let separator = if current.is_empty() { 0 } else { SEPARATOR.len() };
        if current_len + separator + piece_len > budget && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_len = piece_len;
        } else {
            current_len += separator + piece_len;
        }
        current.push(piece);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    batches.into_iter().map(|batch| batch.join(SEPARATOR)).collect()
}
