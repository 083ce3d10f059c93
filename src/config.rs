use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "sqlite".to_string()
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/lrag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_sentence_boundaries")]
    pub sentence_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            sentence_boundaries: default_sentence_boundaries(),
        }
    }
}

fn default_max_chars() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    120
}
fn default_sentence_boundaries() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key for hosted
    /// providers. Resolved once in [`load_config`]; components never read
    /// the environment themselves.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_ollama_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            metric: default_metric(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_mode() -> String {
    "hybrid".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_top_k() -> i64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            base_url: default_ollama_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            temperature: default_temperature(),
            max_context_chars: default_max_context_chars(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "deepseek-r1:1.5b".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_generation_timeout_secs() -> u64 {
    120
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
    "127.0.0.1:8087".to_string()
}

/// Starter configuration written by `lrag init` when no config file exists.
pub const DEFAULT_CONFIG_TOML: &str = r#"# localrag configuration

[storage]
backend = "sqlite"            # sqlite | memory
path = "./data/lrag.sqlite"

[chunking]
max_chars = 1200
overlap_chars = 120
sentence_boundaries = true

[embedding]
provider = "ollama"           # ollama | openai | hashed
model = "nomic-embed-text"
dims = 768
base_url = "http://localhost:11434"
# api_key_env = "OPENAI_API_KEY"
batch_size = 32
max_retries = 5
backoff_ms = 500
timeout_secs = 30

[retrieval]
mode = "hybrid"               # keyword | semantic | hybrid
metric = "cosine"             # cosine | dot
hybrid_alpha = 0.6
candidate_k = 80
top_k = 8

[generation]
provider = "ollama"           # ollama | openai | echo
model = "deepseek-r1:1.5b"
base_url = "http://localhost:11434"
temperature = 0.2
max_context_chars = 12000
timeout_secs = 120

[server]
bind = "127.0.0.1:8087"
"#;

/// Write the starter config to `path` unless one already exists.
///
/// Returns `true` when a new file was written.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(true)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    match config.storage.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    // Validate retrieval
    match config.retrieval.mode.as_str() {
        "keyword" | "semantic" | "hybrid" => {}
        other => anyhow::bail!(
            "Unknown retrieval mode: '{}'. Must be keyword, semantic, or hybrid.",
            other
        ),
    }
    match config.retrieval.metric.as_str() {
        "cosine" | "dot" => {}
        other => anyhow::bail!("Unknown similarity metric: '{}'. Must be cosine or dot.", other),
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "openai" | "hashed" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, or hashed.",
            other
        ),
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "ollama" | "openai" | "echo" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama, openai, or echo.",
            other
        ),
    }

    // Hosted providers need their key resolved now; nothing reads the
    // environment after this point.
    if config.embedding.provider == "openai" {
        config.embedding.api_key = Some(resolve_api_key(&config.embedding.api_key_env)?);
    }
    if config.generation.provider == "openai" {
        config.generation.api_key = Some(resolve_api_key(&config.generation.api_key_env)?);
    }

    Ok(config)
}

fn resolve_api_key(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| {
        format!("environment variable {var} must be set when provider is 'openai'")
    })
}
