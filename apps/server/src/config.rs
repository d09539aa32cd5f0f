use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use answer_core::AnswerConfig;
use ingest_core::IngestConfig;

/// Service configuration, read once from the process environment. Every
/// numeric falls back to its default when unset or unparsable.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,

    pub emb_url: String,
    pub emb_model: String,
    pub emb_dim: usize,
    pub llm_url: String,
    pub llm_model: String,

    pub db_path: PathBuf,
    pub uploads_root: PathBuf,

    pub parser_python: PathBuf,
    pub parser_script: Option<PathBuf>,
    pub hwp2txt_exe: Option<PathBuf>,

    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub max_chunks_emb: usize,
    pub fast_mode: bool,
    pub render_pages: bool,
    pub enable_table_index: bool,
    pub max_table_rows_emb: usize,
    pub max_caption_pages: i64,

    pub retrieve_min: f32,
    pub use_as_ctx_min: f32,
    pub min_top3_avg: f32,
    pub text_k: usize,
    pub table_k: usize,
    pub image_k: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080))),
            emb_url: env_string("EMB_URL", "http://127.0.0.1:8001"),
            emb_model: env_string("EMB_MODEL", "bge-m3"),
            emb_dim: env_parse("EMB_DIM", doc_store::EMBEDDING_DIM),
            llm_url: env_string("LLM_URL", "http://127.0.0.1:8000"),
            llm_model: env_string("LLM_MODEL", "qwen2.5-7b-instruct"),
            db_path: PathBuf::from(env_string("DB_PATH", "data/docqa.sqlite3")),
            uploads_root: PathBuf::from(env_string("UPLOAD_DIR", "uploads")),
            parser_python: PathBuf::from(env_string("PARSER_PYTHON", "python3")),
            parser_script: env_path("PARSER_SCRIPT"),
            hwp2txt_exe: env_path("HWP2TXT_EXE"),
            chunk_size_tokens: env_parse("CHUNK_SIZE_TOKENS", ingest_core::DEFAULT_CHUNK_TOKENS),
            chunk_overlap_tokens: env_parse(
                "CHUNK_OVERLAP_TOKENS",
                ingest_core::DEFAULT_OVERLAP_TOKENS,
            ),
            max_chunks_emb: env_parse("MAX_CHUNKS_EMB", 0),
            fast_mode: env_flag("FAST_MODE", false),
            render_pages: env_flag("RENDER_PAGES", false),
            enable_table_index: env_flag("ENABLE_TABLE_INDEX", true),
            max_table_rows_emb: env_parse("MAX_TABLE_ROWS_EMB", 50),
            max_caption_pages: env_parse("MAX_CAPTION_PAGES", 8),
            retrieve_min: env_parse("RETRIEVE_MIN", 0.35),
            use_as_ctx_min: env_parse("USE_AS_CTX_MIN", 0.60),
            min_top3_avg: env_parse("MIN_TOP3_AVG", 0.55),
            text_k: env_parse("TEXT_K", 5),
            table_k: env_parse("TABLE_K", 10),
            image_k: env_parse("IMAGE_K", 4),
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            uploads_root: self.uploads_root.clone(),
            chunk_size_tokens: self.chunk_size_tokens,
            chunk_overlap_tokens: self.chunk_overlap_tokens,
            max_chunks_emb: self.max_chunks_emb,
            fast_mode: self.fast_mode,
            render_pages: self.render_pages,
            enable_table_index: self.enable_table_index,
            max_table_rows_emb: self.max_table_rows_emb,
            max_caption_pages: self.max_caption_pages,
            hwp_converter: self.hwp2txt_exe.clone(),
            ..IngestConfig::default()
        }
    }

    pub fn answer_config(&self) -> AnswerConfig {
        AnswerConfig {
            retrieve_min: self.retrieve_min,
            use_as_ctx_min: self.use_as_ctx_min,
            min_top3_avg: self.min_top3_avg,
            text_k: self.text_k,
            table_k: self.table_k,
            image_k: self.image_k,
            ..AnswerConfig::default()
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
