mod config;
mod router;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests_rest;

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use answer_core::AnswerEngine;
use doc_store::VectorStore;
use ingest_core::Ingestor;
use llm_client::{EmbeddingClient, GenerationClient};
use parser_bridge::ParserBridge;

use config::Config;
use router::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    fs::create_dir_all(&config.uploads_root).context("failed to create uploads directory")?;

    let store = Arc::new(
        VectorStore::open(&config.db_path, config.emb_dim)
            .context("failed to open vector store")?,
    );
    let embedder = Arc::new(EmbeddingClient::new(&config.emb_url, &config.emb_model));
    let generator = Arc::new(GenerationClient::new(&config.llm_url, &config.llm_model));
    let bridge = config
        .parser_script
        .as_ref()
        .map(|script| Arc::new(ParserBridge::new(&config.parser_python, script)));

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        bridge,
        config.ingest_config(),
    ));
    let engine = Arc::new(AnswerEngine::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        Arc::clone(&generator),
        config.answer_config(),
    ));

    let state = AppState {
        store,
        ingestor,
        engine,
        emb_url: config.emb_url.clone(),
        llm_url: config.llm_url.clone(),
        storage: config.db_path.display().to_string(),
        fast_mode: config.fast_mode,
        render_pages: config.render_pages,
        enable_table_index: config.enable_table_index,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server stopped with an error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
