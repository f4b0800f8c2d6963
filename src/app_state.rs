use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::{
    agent::BudgetAgent,
    config::AppConfig,
    error::IndexError,
    index_builder::{build_indices, IndexSettings},
    llm::LlmManager,
    openai_chat::OpenAiChatModel,
    query_engine::{SummaryQueryEngine, VectorQueryEngine},
    session::SessionStore,
    tools::ToolRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub agents: AgentService,
    pub sessions: SessionStore,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Status {
    pub ready: bool,
    pub building: bool,
    pub sessions: usize,
    pub message: String,
}

type Builder = dyn Fn() -> BoxFuture<'static, Result<BudgetAgent, IndexError>> + Send + Sync;

/// Agente compartido por todas las sesiones, construido como mucho una vez
/// hasta que se invalide.
///
/// La construcción se serializa con su propio mutex: si varias peticiones
/// llegan en frío, una construye y las demás esperan ese mismo resultado.
/// El agente ya construido se lee de `slot` sin esperar a ninguna
/// construcción en curso.
#[derive(Clone)]
pub struct AgentService {
    builder: Arc<Builder>,
    slot: Arc<RwLock<Option<Arc<BudgetAgent>>>>,
    build_lock: Arc<Mutex<()>>,
    building: Arc<AtomicBool>,
    builds: Arc<AtomicUsize>,
}

/// Marca una construcción en curso; se desmarca también si el futuro de
/// `get` se descarta a medias.
struct BuildingFlag(Arc<AtomicBool>);

impl BuildingFlag {
    fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for BuildingFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AgentService {
    pub fn new<F, Fut>(builder: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BudgetAgent, IndexError>> + Send + 'static,
    {
        Self {
            builder: Arc::new(move || builder().boxed()),
            slot: Arc::new(RwLock::new(None)),
            build_lock: Arc::new(Mutex::new(())),
            building: Arc::new(AtomicBool::new(false)),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Servicio de producción: índices + herramientas + modelo de OpenAI.
    pub fn from_config(cfg: Arc<AppConfig>) -> Self {
        Self::new(move || build_agent(Arc::clone(&cfg)))
    }

    pub async fn get(&self) -> Result<Arc<BudgetAgent>, IndexError> {
        if let Some(agent) = self.current().await {
            return Ok(agent);
        }

        let _build = self.build_lock.lock().await;
        // Otra petición pudo terminar la construcción mientras esperábamos.
        if let Some(agent) = self.current().await {
            return Ok(agent);
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        let flag = BuildingFlag::raise(&self.building);
        let agent = Arc::new((self.builder)().await?);
        *self.slot.write().await = Some(Arc::clone(&agent));
        drop(flag);
        Ok(agent)
    }

    async fn current(&self) -> Option<Arc<BudgetAgent>> {
        self.slot.read().await.as_ref().map(Arc::clone)
    }

    /// Descarta el agente actual; el siguiente `get` lo reconstruye. Los
    /// turnos en curso conservan su copia.
    pub async fn invalidate(&self) {
        self.slot.write().await.take();
        info!("Agente invalidado; se reconstruirá en el próximo acceso.");
    }

    pub async fn is_ready(&self) -> bool {
        self.slot.read().await.is_some()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::SeqCst)
    }

    /// Número de construcciones lanzadas desde el arranque.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

/// Compone el agente: índices → motores de consulta → herramientas → agente.
pub async fn build_agent(cfg: Arc<AppConfig>) -> Result<BudgetAgent, IndexError> {
    let qa_llm = Arc::new(LlmManager::qa_from_config(&cfg));
    let summary_llm = Arc::new(LlmManager::summary_from_config(&cfg));

    let indices = build_indices(&IndexSettings::from_config(&cfg), qa_llm.as_ref()).await?;
    info!(
        "Índices listos: {} nodos (vectorial: {:?}).",
        indices.nodes.len(),
        indices.vector_source
    );

    let vector_engine = Arc::new(VectorQueryEngine::new(
        indices.vector,
        qa_llm.clone(),
        qa_llm,
        cfg.similarity_top_k,
    ));
    let summary_engine = Arc::new(SummaryQueryEngine::new(
        indices.summary,
        summary_llm,
        cfg.summary_context_chars,
    ));
    let tools = Arc::new(ToolRegistry::new(vector_engine, summary_engine));
    let model = Arc::new(OpenAiChatModel::from_config(&cfg));

    Ok(BudgetAgent::new(model, tools, cfg.max_tool_rounds))
}
