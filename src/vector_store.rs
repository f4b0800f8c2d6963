//! Índice vectorial sobre los nodos, persistido en disco como JSON.
//!
//! API pública:
//!   - `VectorIndex::build(nodes, &dyn EmbeddingProvider)`
//!   - `VectorIndex::persist(dir)` / `VectorIndex::load(dir)` / `VectorIndex::exists(dir)`
//!   - `VectorIndex::search(&[f32], top_k)`.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::IndexError;
use crate::llm::EmbeddingProvider;
use crate::models::Node;

const INDEX_FILE: &str = "vector_index.json";
const EMBED_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
}

/// Nodo con su embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedNode {
    pub node: Arc<Node>,
    pub embedding: Vec<f32>,
}

/// Resultado de una búsqueda: nodo y similitud coseno.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Arc<Node>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    entries: Vec<EmbeddedNode>,
}

impl VectorIndex {
    /// Calcula el embedding de cada nodo, en lotes de `EMBED_BATCH_SIZE`.
    pub async fn build(
        nodes: &[Arc<Node>],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, IndexError> {
        let mut entries = Vec::with_capacity(nodes.len());
        for batch in nodes.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::EmbeddingCount {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }
            entries.extend(batch.iter().zip(vectors).map(|(node, embedding)| EmbeddedNode {
                node: Arc::clone(node),
                embedding,
            }));
        }

        let dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        info!(
            "Índice vectorial construido: {} nodos, {} dimensiones.",
            entries.len(),
            dimensions
        );

        Ok(Self {
            metadata: IndexMetadata {
                embedding_model: embedder.model_name().to_string(),
                dimensions,
                created_at: Utc::now(),
            },
            entries,
        })
    }

    pub fn index_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    /// ¿Hay un índice persistido en el directorio?
    pub fn exists(dir: &Path) -> bool {
        Self::index_path(dir).is_file()
    }

    /// Escribe el índice en `dir`, creándolo si no existe. La escritura pasa
    /// por un fichero temporal para no dejar nunca un índice a medias.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| IndexError::Io { path, source }
        };

        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let target = Self::index_path(dir);
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));

        let json = serde_json::to_vec(self).map_err(|source| IndexError::Corrupt {
            path: target.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &target).map_err(io_err(&target))?;

        info!("Índice vectorial persistido en {}", target.display());
        Ok(())
    }

    /// Recarga el índice persistido sin recalcular embeddings.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let path = Self::index_path(dir);
        let bytes = fs::read(&path).map_err(|source| IndexError::Io {
            path: path.clone(),
            source,
        })?;
        let index: Self = serde_json::from_slice(&bytes).map_err(|source| IndexError::Corrupt {
            path: path.clone(),
            source,
        })?;
        info!(
            "Índice vectorial cargado desde {} ({} nodos, modelo {}).",
            path.display(),
            index.entries.len(),
            index.metadata.embedding_model
        );
        Ok(index)
    }

    /// Los `top_k` nodos más similares, de mayor a menor puntuación. A igual
    /// puntuación se respeta el orden de inserción.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredNode> {
        let mut scored: Vec<ScoredNode> = self
            .entries
            .iter()
            .map(|entry| ScoredNode {
                node: Arc::clone(&entry.node),
                score: cosine_similarity(&entry.embedding, query),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.node.id.as_str())
    }
}

/// Similitud coseno; 0.0 si alguno de los vectores es nulo o si las
/// dimensiones no coinciden.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
