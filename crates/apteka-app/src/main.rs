//! Apteka application binary - composition root.
//!
//! 1. Parse CLI, load TOML configuration, apply env overrides
//! 2. Initialise tracing
//! 3. Build the external clients (Gemini chat, Gemini embeddings, Chroma)
//! 4. Open the locations database
//! 5. Run the requested subcommand: the API server with its session
//!    sweeper, or one of the data loaders

mod cli;
mod ingest;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use apteka_api::state::AppState;
use apteka_api::start_server;
use apteka_chat::{
    CascadeConfig, ChatOrchestrator, InMemorySessionStore, RetrievalCascade, SessionPolicy,
    SessionSweeper,
};
use apteka_core::config::AptekaConfig;
use apteka_llm::{GeminiClient, GeminiConfig};
use apteka_storage::{Database, LocationRepository, SqliteLocator};
use apteka_vector::{ChromaIndex, GeminiEmbedding};
use clap::Parser;

use crate::cli::{expand_home, CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

fn open_database(config: &AptekaConfig) -> AppResult<Arc<Database>> {
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path: PathBuf = data_dir.join(&config.locations.db_path);
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    Ok(Arc::new(db))
}

fn semantic_index(config: &AptekaConfig) -> AppResult<ChromaIndex<GeminiEmbedding>> {
    let embedder = GeminiEmbedding::from_config(&config.llm, &config.index)?;
    let index = ChromaIndex::new(&config.index, embedder)?;
    tracing::info!(
        url = %config.index.base_url,
        collection = %config.index.collection,
        "Semantic index configured"
    );
    Ok(index)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn serve(config: AptekaConfig) -> AppResult<()> {
    if config.llm.api_key.trim().is_empty() {
        tracing::warn!("No language service API key configured; chat turns will fail");
    }

    let db = open_database(&config)?;
    let llm = GeminiClient::new(GeminiConfig::from(&config.llm))?;
    let index = semantic_index(&config)?;

    let sessions = Arc::new(InMemorySessionStore::new(SessionPolicy::from_config(
        &config.session,
    )));
    let cascade = RetrievalCascade::new(
        Arc::new(index),
        CascadeConfig::from_config(&config.index, &config.retrieval),
    );
    let orchestrator = ChatOrchestrator::new(
        Arc::new(llm),
        cascade,
        Arc::new(SqliteLocator::new(db)),
        sessions.clone(),
    )
    .with_limits(config.session.history_cap, config.locations.nearby_limit);

    // === Background tasks ===

    let sweeper = Arc::new(SessionSweeper::new(
        sessions,
        Duration::from_secs(config.session.sweep_interval_secs),
    ));
    let sweeper_task = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move { sweeper.run().await })
    };

    // === API server ===

    let state = AppState::new(orchestrator, &config.server);
    let result = start_server(&config.server, state, shutdown_signal()).await;

    sweeper.shutdown();
    if let Err(e) = sweeper_task.await {
        tracing::warn!(error = %e, "Session sweeper task ended abnormally");
    }

    result.map_err(|e| {
        tracing::error!(error = %e, "API server stopped with an error");
        e.into()
    })
}

async fn run_ingest(config: AptekaConfig, file: PathBuf) -> AppResult<()> {
    let index = semantic_index(&config)?;
    let (sent, skipped) = ingest::ingest_file(&index, &file).await?;
    tracing::info!(sent, skipped, "Ingestion finished");
    println!("Uploaded {} documents ({} skipped) from {}", sent, skipped, file.display());
    Ok(())
}

async fn run_load_locations(config: AptekaConfig, file: PathBuf) -> AppResult<()> {
    let db = open_database(&config)?;
    let loaded = ingest::read_locations_file(&file)?;
    let skipped = loaded.skipped;

    let repo = LocationRepository::new(db);
    let inserted = tokio::task::spawn_blocking(move || repo.insert_batch(&loaded.items)).await??;

    tracing::info!(inserted, skipped, "Locations loaded");
    println!("Inserted {} locations ({} skipped) from {}", inserted, skipped, file.display());
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = AptekaConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.server.port = args.resolve_port(config.server.port);

    // Tracing.
    // Priority: --log-level > RUST_LOG > general.log_level > info.
    let filter = args.log_filter(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Apteka v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");
    config.validate()?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ingest { file } => run_ingest(config, file).await,
        Command::LoadLocations { file } => run_load_locations(config, file).await,
    }
}
