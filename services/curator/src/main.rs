use std::sync::Arc;

use anyhow::{Context, Result};
use dataset::{DatasetStore, FileBackedStorage, Storage};
use tracing::info;

use curator::config::AppConfig;
use curator::orchestrator_job::Orchestrator;
use curator::prompts::PromptSet;
use curator::provider::ModelProvider;
use curator::provider_openai::OpenAiCompatProvider;
use curator::rewrite::RewriteStrategy;
use curator::scoring::Scorer;
use curator::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Storage ---
    let storage = FileBackedStorage::open(&cfg.data_path)
        .await
        .with_context(|| format!("Failed to open dataset file {}", cfg.data_path.display()))?;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let store = DatasetStore::load(storage.as_ref(), &cfg.session)
        .await
        .context("Failed to load session")?;
    info!(session = %cfg.session, records = store.len().await, "dataset: loaded");

    // --- Prompts ---
    let prompts = match &cfg.prompts_path {
        Some(path) => PromptSet::from_file(path)?,
        None => PromptSet::default(),
    };
    let prompts = Arc::new(prompts);

    // --- Model provider ---
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatProvider::new(
        cfg.model_base_url.clone(),
        cfg.model_api_key.clone(),
        cfg.model_name.clone(),
    ));
    let info = provider.info();
    info!(provider = %info.name, base_url = %info.base_url, model = %cfg.model_name, "provider: configured");

    let params = cfg.generation_params();
    let strategy = Arc::new(RewriteStrategy::new(provider.clone(), prompts.clone(), params.clone()));
    let scorer = Arc::new(Scorer::new(provider, prompts, params));
    let orchestrator = Orchestrator::new(store, strategy, scorer).with_history_limit(cfg.job_history_limit);

    let app_state = Arc::new(AppState::new(cfg.clone(), storage, orchestrator));
    let app = curator::router(app_state);

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("curator listening on http://{addr}");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
