use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{Config, StatusBackend};
use crate::db::Database;
use crate::llm::LlmProvider;
use crate::ocr::DocumentExtractor;
use crate::rag::DocumentIndex;
use crate::status_store::{MemoryStatusStore, SqliteStatusStore, StatusStore};
use crate::tasks::{TaskBoard, CHAT_TASK_NAMESPACE, TRANSCRIPTION_TASK_NAMESPACE};
use crate::transcription::Transcriber;

pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub status_store: Arc<dyn StatusStore>,
    pub chat_tasks: TaskBoard,
    pub transcription_tasks: TaskBoard,
    pub llm: Arc<dyn LlmProvider>,
    pub documents: DocumentIndex,
    pub extractor: Option<Arc<dyn DocumentExtractor>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl AppState {
    /// Wires the shared collaborators from `config`. Providers without
    /// credentials are left out and their features degrade.
    pub fn build(config: Config, db: Arc<Database>) -> Self {
        let status_store: Arc<dyn StatusStore> = match config.status_backend {
            StatusBackend::Sqlite => Arc::new(SqliteStatusStore::new(db.clone())),
            StatusBackend::Memory => Arc::new(MemoryStatusStore::new()),
        };
        let llm: Arc<dyn LlmProvider> = Arc::from(crate::llm::create_provider(&config));
        let embedding = crate::embedding::create_provider(&config);
        let extractor: Option<Arc<dyn DocumentExtractor>> =
            crate::ocr::create_extractor(&config).map(Arc::from);
        let transcriber = crate::transcription::create_transcriber(&config);
        Self::with_parts(config, db, status_store, llm, embedding, extractor, transcriber)
    }

    pub fn with_parts(
        config: Config,
        db: Arc<Database>,
        status_store: Arc<dyn StatusStore>,
        llm: Arc<dyn LlmProvider>,
        embedding: Option<Arc<dyn crate::embedding::EmbeddingProvider>>,
        extractor: Option<Arc<dyn DocumentExtractor>>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Self {
        let ttl = config.task_ttl();
        Self {
            chat_tasks: TaskBoard::new(status_store.clone(), CHAT_TASK_NAMESPACE, ttl),
            transcription_tasks: TaskBoard::new(
                status_store.clone(),
                TRANSCRIPTION_TASK_NAMESPACE,
                ttl,
            ),
            documents: DocumentIndex::new(db.clone(), embedding),
            config,
            db,
            status_store,
            llm,
            extractor,
            transcriber,
        }
    }
}

/// Periodically drops expired status entries so unread tasks do not pile up.
pub fn spawn_status_sweeper(
    store: Arc<dyn StatusStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => info!(purged = n, backend = store.backend(), "Swept expired task entries"),
                        Err(e) => warn!(error = %e, "Status sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let runtime_dir = config.runtime_data_dir();
    let db = Arc::new(
        Database::new(&runtime_dir)
            .with_context(|| format!("Failed to open database in {runtime_dir}"))?,
    );
    let state = Arc::new(AppState::build(config, db));

    if !state.config.has_llm_credentials() {
        warn!("No LLM API key configured; chat requests will be rejected");
    }
    if state.extractor.is_none() {
        info!("OCR disabled: no mistral_api_key configured");
    }
    if state.transcriber.is_none() {
        info!("Transcription disabled: no replicate_api_token configured");
    }
    info!(
        backend = state.status_store.backend(),
        model = state.llm.model(),
        "Runtime ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = crate::queue::spawn_queue_worker(
        state.db.clone(),
        Duration::from_millis(state.config.queue_poll_interval_ms),
        shutdown_rx.clone(),
    );
    let sweeper = spawn_status_sweeper(
        state.status_store.clone(),
        Duration::from_secs(state.config.status_sweep_interval_secs),
        shutdown_rx,
    );

    let served = crate::web::start_web_server(state).await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        warn!(error = %e, "Queue worker ended abnormally");
    }
    let _ = sweeper.await;
    served
}
