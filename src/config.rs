use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the object store and transient clone workspaces live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Embedding and generation provider configuration
    pub llm: LlmConfig,
    /// Character budget per chunk
    pub chunk_char_budget: usize,
    /// Fraction of the budget carried over between consecutive chunks
    pub chunk_overlap: f32,
    /// Clone timeout in seconds
    pub clone_timeout_secs: u64,
    /// Maximum repo size in MB (checked after clone)
    pub max_repo_size_mb: u64,
    /// How many commits of history to ingest, newest first
    pub max_commits: usize,
    /// Summarize non-trivial commits with the chat model during ingestion
    pub summarize_commits: bool,
    /// Maximum concurrent chat requests
    pub max_concurrent_chats: usize,
    /// Seconds without a generation delta before a stream is abandoned
    pub chat_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat and commit summaries
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding requests in flight at once, shared by ingestion and queries
    pub max_concurrent_embeds: usize,
    /// How long an embedding call may wait for a slot before timing out
    pub embed_wait_timeout_secs: u64,
    /// Retries for rate-limited or 5xx embedding responses
    pub embed_max_retries: u32,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            llm: LlmConfig::default(),
            chunk_char_budget: 1800,
            chunk_overlap: 0.15,
            clone_timeout_secs: 300,
            max_repo_size_mb: 500,
            max_commits: 500,
            summarize_commits: false,
            max_concurrent_chats: 4,
            chat_idle_timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            max_concurrent_embeds: 4,
            embed_wait_timeout_secs: 60,
            embed_max_retries: 3,
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REPO_MENTOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("REPO_MENTOR_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_MAX_CONCURRENT_EMBEDS") {
            if let Ok(v) = val.parse() {
                config.llm.max_concurrent_embeds = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_EMBED_WAIT_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.embed_wait_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_EMBED_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                config.llm.embed_max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_REQUEST_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.request_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_CHUNK_CHAR_BUDGET") {
            if let Ok(v) = val.parse() {
                config.chunk_char_budget = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_CHUNK_OVERLAP") {
            if let Ok(v) = val.parse::<f32>() {
                config.chunk_overlap = v.clamp(0.0, 0.9);
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_CLONE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.clone_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_MAX_REPO_SIZE_MB") {
            if let Ok(v) = val.parse() {
                config.max_repo_size_mb = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_MAX_COMMITS") {
            if let Ok(v) = val.parse() {
                config.max_commits = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_SUMMARIZE_COMMITS") {
            if let Ok(v) = val.parse() {
                config.summarize_commits = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_MAX_CONCURRENT_CHATS") {
            if let Ok(v) = val.parse() {
                config.max_concurrent_chats = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_MENTOR_CHAT_IDLE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.chat_idle_timeout_secs = v;
            }
        }

        config
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn max_repo_size_bytes(&self) -> u64 {
        self.max_repo_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.chunk_char_budget > 0);
        assert!(config.chunk_overlap >= 0.0 && config.chunk_overlap < 1.0);
        assert!(config.llm.max_concurrent_embeds > 0);
        assert!(config.max_concurrent_chats > 0);
    }

    #[test]
    fn test_path_helpers_are_rooted_in_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/mentor"),
            ..Config::default()
        };
        assert_eq!(
            config.workspaces_dir(),
            PathBuf::from("/tmp/mentor/workspaces")
        );
        assert_eq!(config.store_dir(), PathBuf::from("/tmp/mentor/store"));
    }

    #[test]
    fn test_repo_size_cap_converts_to_bytes() {
        let config = Config {
            max_repo_size_mb: 2,
            ..Config::default()
        };
        assert_eq!(config.max_repo_size_bytes(), 2 * 1024 * 1024);
    }
}
