// Módulos de la aplicación
mod agent;
mod api;
mod app_state;
mod config;
mod error;
mod index_builder;
mod ingest;
mod llm;
mod models;
mod openai_chat;
mod query_engine;
mod session;
mod splitter;
mod summary_index;
mod tools;
mod vector_store;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AgentService, AppState};
use crate::session::SessionStore;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // 2. Cargar configuración
    let cfg = Arc::new(config::AppConfig::from_env().context("Error al cargar la configuración")?);

    // 3. Construir el agente antes de aceptar conexiones: índices, herramientas y modelo
    let agents = AgentService::from_config(Arc::clone(&cfg));
    agents
        .get()
        .await
        .context("Error construyendo los índices del agente")?;

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: Arc::clone(&cfg),
        agents,
        sessions: SessionStore::default(),
    };

    // 5. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
