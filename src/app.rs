//! Process-wide application context.
//!
//! Everything that used to be ambient module state lives here as an
//! explicitly constructed instance. [`AppContext::bootstrap`] builds the
//! pieces in a fixed order:
//!
//! 1. similarity index (loads its snapshot)
//! 2. conversation history (loads its snapshot, evicting expired entries)
//! 3. inference clients (embedding, completion)
//! 4. code executor
//!
//! The index sits behind a read/write lock so a document sync can swap in
//! a rebuilt index while questions are being answered; history sits behind
//! a mutex so appends from concurrent runs are serialized. Document syncs
//! run one at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::agent::{Agent, AgentAnswer, AgentSettings};
use crate::completion::{CompletionClient, OllamaChat};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, OllamaEmbedder};
use crate::executor::{CodeExecutor, LuaExecutor};
use crate::history::ConversationHistory;
use crate::index::SimilarityIndex;
use crate::ingest;
use crate::models::{HistoryEntry, IndexStatus, SyncReport};
use crate::snapshot::SnapshotError;

pub struct AppContext {
    config: Arc<Config>,
    index: Arc<RwLock<SimilarityIndex>>,
    history: Arc<Mutex<ConversationHistory>>,
    embedder: Arc<dyn EmbeddingClient>,
    executor: Arc<dyn CodeExecutor>,
    agent: Agent,
    sync_lock: Mutex<()>,
}

impl AppContext {
    /// Build the context with the Ollama clients and the Lua executor.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let embedder = OllamaEmbedder::new(&config.inference)
            .context("Failed to create embedding client")?;
        let completer =
            OllamaChat::new(&config.inference).context("Failed to create completion client")?;
        let executor = LuaExecutor::new(Duration::from_secs(config.agent.exec_timeout_secs))
            .context("Failed to create code executor")?;

        Ok(Self::with_components(
            config,
            Arc::new(embedder),
            Arc::new(completer),
            Arc::new(executor),
        ))
    }

    /// Build the context around caller-supplied clients.
    ///
    /// Stores are still loaded from the paths in `config`.
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn EmbeddingClient>,
        completer: Arc<dyn CompletionClient>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        let index = Arc::new(RwLock::new(SimilarityIndex::open(config.index.path.clone())));
        let history = Arc::new(Mutex::new(ConversationHistory::open(
            config.history.path.clone(),
            config.history.retention_seconds(),
        )));

        info!(
            chat_model = completer.model_name(),
            embed_model = embedder.model_name(),
            executor = executor.language(),
            "application context ready"
        );

        let agent = Agent::new(
            Arc::clone(&embedder),
            completer,
            Arc::clone(&executor),
            Arc::clone(&index),
            Arc::clone(&history),
            AgentSettings::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            index,
            history,
            embedder,
            executor,
            agent,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn executor(&self) -> &dyn CodeExecutor {
        self.executor.as_ref()
    }

    pub async fn ask(&self, question: &str) -> AgentAnswer {
        self.agent.answer(question).await
    }

    /// Rebuild the index from the documents folder.
    ///
    /// A sync started while another is running waits for it to finish.
    pub async fn sync_documents(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        ingest::sync_documents(&self.config, self.embedder.as_ref(), &self.index).await
    }

    pub async fn index_status(&self) -> IndexStatus {
        self.index.read().await.status()
    }

    /// All retained history entries, oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.entries().to_vec()
    }

    pub async fn clear_history(&self) -> Result<(), SnapshotError> {
        self.history.lock().await.clear()
    }
}
