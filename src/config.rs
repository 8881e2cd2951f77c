//! TOML configuration parsing.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! so an empty file is a valid configuration that talks to a local Ollama
//! instance and keeps its snapshots under `./data`.
//!
//! ```toml
//! [inference]
//! base_url = "http://127.0.0.1:11434"
//! chat_model = "qwen2.5:1.5b"
//! embed_model = "nomic-embed-text"
//! dims = 768
//!
//! [agent]
//! max_loops = 5
//! code_fence = "lua"
//!
//! [documents]
//! root = "./docs_input"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Output size of the embedding model. Every stored vector has this length.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embed_model: default_embed_model(),
            dims: default_dims(),
            chat_timeout_secs: default_chat_timeout_secs(),
            embed_timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_chat_model() -> String {
    "qwen2.5:1.5b".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_chat_timeout_secs() -> u64 {
    120
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/knowledge_db.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl HistoryConfig {
    pub fn retention_seconds(&self) -> f64 {
        (self.retention_days * 24 * 3600) as f64
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from("./data/chat_history.json")
}
fn default_retention_days() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Number of most recent history entries replayed into each prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_window: default_history_window(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_history_window() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_loops")]
    pub max_loops: usize,
    /// Language tag of the fenced blocks the agent executes.
    #[serde(default = "default_code_fence")]
    pub code_fence: String,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            code_fence: default_code_fence(),
            exec_timeout_secs: default_exec_timeout_secs(),
            system_prompt: None,
        }
    }
}

fn default_max_loops() -> usize {
    5
}
fn default_code_fence() -> String {
    "lua".to_string()
}
fn default_exec_timeout_secs() -> u64 {
    10
}

/// Upper bound for `agent.exec_timeout_secs` (one day).
const MAX_EXEC_TIMEOUT_SECS: u64 = 86_400;

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./docs_input")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.docx".to_string(),
        "**/*.pdf".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:12345".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.inference.base_url.trim().is_empty() {
        anyhow::bail!("inference.base_url must not be empty");
    }
    if config.inference.dims == 0 {
        anyhow::bail!("inference.dims must be > 0");
    }
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.agent.max_loops == 0 {
        anyhow::bail!("agent.max_loops must be >= 1");
    }
    if !(1..=MAX_EXEC_TIMEOUT_SECS).contains(&config.agent.exec_timeout_secs) {
        anyhow::bail!(
            "agent.exec_timeout_secs must be between 1 and {}",
            MAX_EXEC_TIMEOUT_SECS
        );
    }
    if config.agent.code_fence.trim().is_empty() {
        anyhow::bail!("agent.code_fence must not be empty");
    }
    if config.history.retention_days == 0 {
        anyhow::bail!("history.retention_days must be > 0");
    }
    Ok(())
}
