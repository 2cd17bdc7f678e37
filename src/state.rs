use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::ingest::{Ingestor, TokioInvoker};
use crate::jobs::{JobOrchestrator, JobStore};
use crate::llm::EmbeddingClient;
use crate::rag::{ChunkStore, Retriever};
use crate::storage::{FsObjectStore, ObjectStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    pub jobs: JobStore,
    pub chunks: ChunkStore,
    pub retriever: Retriever,
    pub orchestrator: Arc<JobOrchestrator>,
    pub chat_limit: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config.workspaces_dir())?;
        let store = Arc::new(FsObjectStore::new(config.store_dir())?);
        Self::with_store(config, store)
    }

    /// Wires the full service graph over any object store. Tests use an
    /// in-memory store here.
    pub fn with_store(config: Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.llm.request_timeout_secs))
            .build()?;

        let jobs = JobStore::new(store.clone());
        let chunks = ChunkStore::new(store, jobs.clone());
        let embedder = EmbeddingClient::new(http.clone(), config.llm.clone());
        let retriever = Retriever::new(chunks.clone(), embedder.clone());

        let ingestor = Arc::new(Ingestor::new(
            config.clone(),
            jobs.clone(),
            chunks.clone(),
            embedder,
            http.clone(),
        ));
        let invoker = Arc::new(TokioInvoker::new(ingestor));
        let orchestrator = Arc::new(JobOrchestrator::new(jobs.clone(), invoker));

        let chat_limit = Arc::new(tokio::sync::Semaphore::new(
            config.max_concurrent_chats.max(1),
        ));

        Ok(Self {
            config,
            http,
            jobs,
            chunks,
            retriever,
            orchestrator,
            chat_limit,
        })
    }
}
