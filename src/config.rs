//! Carga y gestión de configuración de la aplicación (proveedor LLM, rutas, servidor).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_QA_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: Url,
    pub server_addr: String,

    pub pdf_dir: PathBuf,
    pub data_dir: PathBuf,

    pub llm_qa_model: String,
    pub llm_summary_model: String,
    pub llm_embedding_model: String,

    /// Tamaño máximo de un nodo, en caracteres.
    pub chunk_size: usize,
    /// Solapamiento máximo entre nodos consecutivos, en caracteres.
    pub chunk_overlap: usize,
    pub similarity_top_k: usize,
    /// Presupuesto de contexto por llamada del motor de resumen, en caracteres.
    pub summary_context_chars: usize,
    pub max_tool_rounds: usize,

    pub app_title: String,
    pub open_browser: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    ///
    /// La clave de API se valida antes que cualquier otro valor: sin ella no se
    /// construye nada más.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openai_api_key = lookup("OPENAI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let base_url_raw = get("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL);
        let openai_base_url =
            Url::parse(&base_url_raw).map_err(|e| ConfigError::InvalidValue {
                key: "OPENAI_BASE_URL",
                value: base_url_raw.clone(),
                reason: e.to_string(),
            })?;

        let chunk_size: usize = parse_number(&lookup, "CHUNK_SIZE", 4096)?;
        let chunk_overlap = parse_number(&lookup, "CHUNK_OVERLAP", 800)?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue {
                key: "CHUNK_OVERLAP",
                value: chunk_overlap.to_string(),
                reason: format!("debe ser menor que CHUNK_SIZE ({chunk_size}) y este mayor que 0"),
            });
        }

        let similarity_top_k = parse_number(&lookup, "SIMILARITY_TOP_K", 2)?;
        let summary_context_chars: usize = parse_number(&lookup, "SUMMARY_CONTEXT_CHARS", 48_000)?;
        // Cada llamada de resumen debe poder contener al menos un nodo completo
        // con su cabecera de origen.
        let min_context = chunk_size.saturating_mul(2);
        if summary_context_chars < min_context {
            return Err(ConfigError::InvalidValue {
                key: "SUMMARY_CONTEXT_CHARS",
                value: summary_context_chars.to_string(),
                reason: format!("debe ser al menos el doble de CHUNK_SIZE ({min_context})"),
            });
        }
        let max_tool_rounds = parse_number(&lookup, "MAX_TOOL_ROUNDS", 5)?;
        let open_browser = parse_flag(&lookup, "OPEN_BROWSER", true)?;

        Ok(Self {
            openai_api_key,
            openai_base_url,
            server_addr: get("SERVER_ADDR", "127.0.0.1:3322"),
            pdf_dir: PathBuf::from(get("PDF_DIR", "pdfs")),
            data_dir: PathBuf::from(get("DATA_DIR", "data")),
            llm_qa_model: get("LLM_QA_MODEL", DEFAULT_QA_MODEL),
            llm_summary_model: get("LLM_SUMMARY_MODEL", DEFAULT_SUMMARY_MODEL),
            llm_embedding_model: get("LLM_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            chunk_size,
            chunk_overlap,
            similarity_top_k,
            summary_context_chars,
            max_tool_rounds,
            app_title: get("APP_TITLE", "Indian Budget 2024 Q&A 🇮🇳"),
            open_browser,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: v,
                reason: "se esperaba true/false".to_string(),
            }),
        },
    }
}
