use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::indexer::Durability;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite file holding file records and ignore rules.
    pub db_path: PathBuf,
    /// Binary snapshot of the vector index.
    pub index_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Embedding dimension D; every stored and queried vector must match.
    pub dims: usize,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            url: default_ollama_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,
    /// Upper bound on reduction rounds before giving up with a
    /// convergence error.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            max_summary_tokens: default_max_summary_tokens(),
            max_rounds: default_max_rounds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexingConfig {
    /// Root directories indexed by `filedex index` when none are given
    /// on the command line. One worker task per root.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub durability: Durability,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_model() -> String {
    "llama3.2:3b-instruct-fp16".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_chunk_size() -> usize {
    1975
}
fn default_overlap() -> usize {
    100
}
fn default_max_summary_tokens() -> usize {
    500
}
fn default_max_rounds() -> u32 {
    8
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must be specified");
    }

    if config.summarize.chunk_size == 0 {
        anyhow::bail!("summarize.chunk_size must be > 0");
    }
    if config.summarize.overlap >= config.summarize.chunk_size {
        anyhow::bail!(
            "summarize.overlap ({}) must be smaller than summarize.chunk_size ({})",
            config.summarize.overlap,
            config.summarize.chunk_size
        );
    }
    if config.summarize.max_rounds == 0 {
        anyhow::bail!("summarize.max_rounds must be >= 1");
    }

    Ok(config)
}
