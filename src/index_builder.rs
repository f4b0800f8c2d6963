//! Construcción de los dos índices a partir del directorio de documentos.
//!
//! - Primer arranque (sin índice persistido): nodos → embeddings → índice
//!   vectorial → disco.
//! - Arranques siguientes: el índice vectorial se recarga de disco sin volver
//!   a calcular embeddings.
//! - El índice de resumen se reconstruye siempre desde los nodos recién
//!   divididos.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::IndexError,
    ingest,
    llm::EmbeddingProvider,
    models::Node,
    splitter::SentenceSplitter,
    summary_index::SummaryIndex,
    vector_store::VectorIndex,
};

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub pdf_dir: PathBuf,
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            pdf_dir: cfg.pdf_dir.clone(),
            data_dir: cfg.data_dir.clone(),
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
        }
    }
}

/// Origen del índice vectorial en este arranque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSource {
    Built,
    Loaded,
}

pub struct Indices {
    pub nodes: Vec<Arc<Node>>,
    pub vector: Arc<VectorIndex>,
    pub summary: Arc<SummaryIndex>,
    pub vector_source: VectorSource,
}

pub async fn build_indices(
    settings: &IndexSettings,
    embedder: &dyn EmbeddingProvider,
) -> Result<Indices, IndexError> {
    // 1) Documentos y nodos (en cada arranque)
    let documents = ingest::load_documents(&settings.pdf_dir).await?;
    let splitter = SentenceSplitter::new(settings.chunk_size, settings.chunk_overlap);
    let nodes = splitter.split(&documents);
    info!(
        "{} documentos divididos en {} nodos.",
        documents.len(),
        nodes.len()
    );

    // 2) Índice vectorial: construir y persistir, o recargar
    let (vector, vector_source) = if VectorIndex::exists(&settings.data_dir) {
        let index = VectorIndex::load(&settings.data_dir)?;
        warn_if_stale(&index, &nodes);
        (index, VectorSource::Loaded)
    } else {
        info!(
            "No hay índice persistido en {}; calculando embeddings de {} nodos...",
            settings.data_dir.display(),
            nodes.len()
        );
        let index = VectorIndex::build(&nodes, embedder).await?;
        index.persist(&settings.data_dir)?;
        (index, VectorSource::Built)
    };

    // 3) Índice de resumen (siempre en memoria)
    let summary = SummaryIndex::new(nodes.clone());

    Ok(Indices {
        nodes,
        vector: Arc::new(vector),
        summary: Arc::new(summary),
        vector_source,
    })
}

/// El índice persistido no se invalida solo: si los documentos cambiaron,
/// sólo se avisa. Borrar el directorio de datos fuerza la reconstrucción.
fn warn_if_stale(index: &VectorIndex, nodes: &[Arc<Node>]) -> bool {
    let persisted: HashSet<&str> = index.node_ids().collect();
    let fresh: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    if persisted == fresh {
        return false;
    }
    warn!(
        "El índice vectorial persistido ({} nodos) no coincide con los documentos actuales ({} nodos). \
         Borra el directorio de datos para reconstruirlo.",
        persisted.len(),
        fresh.len()
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::vector_store::tests::{keyword_vector, KeywordEmbedder};
    use std::fs;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn settings(root: &std::path::Path) -> IndexSettings {
        IndexSettings {
            pdf_dir: root.join("pdfs"),
            data_dir: root.join("data"),
            chunk_size: 80,
            chunk_overlap: 20,
        }
    }

    fn write_sources(root: &std::path::Path) {
        let pdfs = root.join("pdfs");
        fs::create_dir_all(&pdfs).unwrap();
        fs::write(
            pdfs.join("budget_2024.txt"),
            "Income tax slabs were revised. Railway capex is at a record high. \
             Agriculture gets a new research push. Defence modernisation continues.",
        )
        .unwrap();
        fs::write(pdfs.join("speech_2023.txt"), "The 2023 speech focused on tax relief.").unwrap();
    }

    #[tokio::test]
    async fn second_start_reuses_persisted_vectors() {
        let root = tempdir().unwrap();
        write_sources(root.path());
        let settings = settings(root.path());

        let first_embedder = KeywordEmbedder::default();
        let first = build_indices(&settings, &first_embedder).await.unwrap();
        assert_eq!(first.vector_source, VectorSource::Built);
        assert!(settings.data_dir.is_dir());
        assert_eq!(first_embedder.texts.load(Ordering::SeqCst), first.nodes.len());

        let second_embedder = KeywordEmbedder::default();
        let second = build_indices(&settings, &second_embedder).await.unwrap();
        assert_eq!(second.vector_source, VectorSource::Loaded);
        assert_eq!(second_embedder.calls.load(Ordering::SeqCst), 0);

        // Mismo top-k, mismo orden, en los dos "procesos".
        let query = keyword_vector("railway tax");
        let a: Vec<_> = first.vector.search(&query, 3).into_iter().map(|h| h.node.id.clone()).collect();
        let b: Vec<_> = second.vector.search(&query, 3).into_iter().map(|h| h.node.id.clone()).collect();
        assert_eq!(a, b);

        // El índice de resumen se reconstruye con los mismos nodos.
        assert_eq!(second.summary.len(), second.nodes.len());
        assert!(!warn_if_stale(&second.vector, &second.nodes));
    }

    #[tokio::test]
    async fn changed_sources_are_flagged_as_stale() {
        let root = tempdir().unwrap();
        write_sources(root.path());
        let settings = settings(root.path());
        build_indices(&settings, &KeywordEmbedder::default()).await.unwrap();

        fs::write(settings.pdf_dir.join("new_annex.txt"), "Annex on railway fares.").unwrap();
        let reloaded = build_indices(&settings, &KeywordEmbedder::default()).await.unwrap();
        assert_eq!(reloaded.vector_source, VectorSource::Loaded);
        assert!(warn_if_stale(&reloaded.vector, &reloaded.nodes));
        assert!(reloaded.summary.len() > reloaded.vector.len());
    }

    #[tokio::test]
    async fn empty_source_directory_fails_without_embedding() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("pdfs")).unwrap();
        let embedder = KeywordEmbedder::default();
        let result = build_indices(&settings(root.path()), &embedder).await;
        assert!(matches!(result, Err(IndexError::Load(LoadError::Empty(_)))));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(!root.path().join("data").exists());
    }
}
