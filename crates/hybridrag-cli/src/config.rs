use hybridrag_index::{
    Bm25Params, BuilderConfig, EmbeddingProvider, HttpEmbedding, LocalEmbedding, RetrieverConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "hybridrag.toml";

/// Environment variable consulted for the HTTP embedding key.
pub const API_KEY_ENV: &str = "HYBRIDRAG_API_KEY";

#[derive(Debug, Deserialize)]
pub struct HybridragConfig {
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub bm25: Bm25Params,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for HybridragConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            history_dir: default_history_dir(),
            retriever: RetrieverConfig::default(),
            bm25: Bm25Params::default(),
            builder: BuilderConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Local,
    Http,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_backend")]
    pub provider: EmbeddingBackend,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_backend(),
            dimension: default_dimension(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_history_dir() -> PathBuf {
    PathBuf::from("./data/history")
}
fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Local
}
fn default_dimension() -> usize {
    256
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

impl HybridragConfig {
    /// Read and validate the config.
    ///
    /// `explicit` is `None` when the user did not pass `--config`; a missing
    /// default file then yields the built-in defaults.
    pub async fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.retriever.validate()?;
        self.bm25.validate()?;
        self.builder.validate()?;
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be at least 1");
        }
        Ok(())
    }

    /// Construct the configured embedding provider.
    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        let e = &self.embedding;
        match e.provider {
            EmbeddingBackend::Local => Arc::new(LocalEmbedding::new(e.dimension)),
            EmbeddingBackend::Http => {
                let client = HttpEmbedding::new(&e.base_url, &e.model, e.dimension);
                let key = e
                    .api_key
                    .clone()
                    .or_else(|| std::env::var(API_KEY_ENV).ok());
                match key {
                    Some(key) => Arc::new(client.with_api_key(key)),
                    None => Arc::new(client),
                }
            }
        }
    }
}
