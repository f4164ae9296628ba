use std::sync::Arc;

use crate::config::Config;
use crate::llm::embeddings::{EmbeddingClient, EmbeddingModel};
use crate::llm::provider::LlmClient;
use crate::llm::ChatModel;
use crate::store::memory::MemoryStore;
use crate::store::DocumentStore;
use crate::web::{GuardedWebSearch, WebSearchClient, WebSearchTool};
use crate::workflow::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::workflow::graph::WorkflowGraph;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub graph: Arc<WorkflowGraph>,
    pub ask_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        std::fs::create_dir_all(&config.data_dir)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let store: Arc<dyn DocumentStore> =
            Arc::new(MemoryStore::open_or_create(&config.data_dir)?);
        let model: Arc<dyn ChatModel> =
            Arc::new(LlmClient::new(http_client.clone(), config.llm.clone()));
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(EmbeddingClient::new(
            http_client.clone(),
            config.llm.clone(),
            config.embedding.clone(),
        ));

        // The web tool is wired only when enabled AND configured; the
        // quota/cache guard wraps every caller.
        let web_tool: Option<Arc<dyn WebSearchTool>> =
            if config.web.enabled && config.web.base_url.is_some() {
                let client = WebSearchClient::new(http_client.clone(), config.web.clone());
                Some(Arc::new(GuardedWebSearch::new(
                    Arc::new(client),
                    config.web.daily_quota,
                )))
            } else {
                None
            };

        let checkpoints: Option<Arc<dyn CheckpointStore>> =
            match &config.workflow.checkpoint_dir {
                Some(dir) => Some(Arc::new(FileCheckpointStore::new(dir.clone())?)),
                None => None,
            };

        let graph = Arc::new(WorkflowGraph::new(
            config.clone(),
            store.clone(),
            model,
            embedder,
            web_tool,
            checkpoints,
        ));

        Ok(Self {
            config,
            store,
            graph,
            ask_semaphore: Arc::new(tokio::sync::Semaphore::new(3)),
        })
    }
}
