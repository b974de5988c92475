#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub summarizer: SummarizerConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub ranking: RankingConfig,
    pub pipeline: PipelineConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            database: DatabaseConfig::default(),
            summarizer: SummarizerConfig::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            ranking: RankingConfig::default(),
            pipeline: PipelineConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

/// Portal listing/detail endpoints and request shaping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub list_url: String,
    pub page_size: u32,
    /// Unit filter sent with the listing form; "-1" means all units.
    pub unit_filter: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "http://oa.example.edu.cn".to_string(),
            list_url: "http://oa.example.edu.cn/login/Login.jsp?logintype=1".to_string(),
            page_size: 50,
            unit_filter: "-1".to_string(),
            timeout_seconds: 30,
            user_agent: "bulletin-ingest/0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string; overridden by DATABASE_URL when set.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Chat-completions endpoint used for announcement summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    /// Bearer credential; absence means the summarizer is disabled.
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string(),
            model: "glm-4.5-flash".to_string(),
            api_key: None,
            timeout_seconds: 60,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// Batch embeddings endpoint; the vector dimension is a deployment-wide
/// constant baked into the database schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub dimension: u32,
    pub max_input_chars: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key: None,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            max_input_chars: 2000,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub today_ttl_hours: u64,
    pub page_ttl_days: u64,
    pub detail_ttl_days: u64,
    /// Window size for the paginated list regions.
    pub page_limit: i64,
}

impl Default for CacheConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            today_ttl_hours: 24,
            page_ttl_days: 3,
            detail_ttl_days: 3,
            page_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub recency_weight: f64,
    pub half_life_days: f64,
    /// Optional hard bound on candidate age; None disables the filter.
    pub max_age_days: Option<i64>,
}

impl Default for RankingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            recency_weight: 0.05,
            half_life_days: 14.0,
            max_age_days: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorPolicy {
    /// Fetch and summarize anyway so upstream issues stay visible; skip
    /// dedup, persistence, and cache refresh.
    Degraded,
    /// Abort the run when the store is unreachable.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retry rounds over the failed subset after the initial summary pass.
    pub max_summary_retries: u32,
    pub on_store_error: StoreErrorPolicy,
}

impl Default for PipelineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_summary_retries: 3,
            on_store_error: StoreErrorPolicy::Degraded,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid page size: {0} (must be between 1 and 500)")]
    InvalidPageSize(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid max connections: {0} (must be between 1 and 100)")]
    InvalidMaxConnections(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid embed input limit: {0} (must be between 200 and 20000 characters)")]
    InvalidEmbedInputLimit(usize),
    #[error("Invalid cache TTL: {0} (must be at least 1)")]
    InvalidCacheTtl(u64),
    #[error("Invalid page limit: {0} (must be between 1 and 100)")]
    InvalidPageLimit(i64),
    #[error("Invalid recency weight: {0} (must be non-negative)")]
    InvalidRecencyWeight(f64),
    #[error("Invalid half life: {0} (must be at least 1 day)")]
    InvalidHalfLife(f64),
    #[error("Invalid max age: {0} (must be at least 1 day)")]
    InvalidMaxAge(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from `config.toml` under the given directory,
    /// falling back to defaults when the file does not exist, then overlay
    /// secrets from the environment.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
        } else {
            Config::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config.apply_env_overrides();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default config directory (`~/.config/bulletin-ingest`).
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = default_config_dir().ok_or(ConfigError::DirectoryError)?;
        Self::load(dir)
    }

    /// Secrets and deploy-specific endpoints come from the environment so
    /// the config file can be committed without credentials.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = Some(url);
            }
        }
        if let Ok(key) = env::var("AI_API_KEY") {
            if !key.is_empty() {
                self.summarizer.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var("EMBED_BASE_URL") {
            if !url.is_empty() {
                self.embedding.base_url = Some(url);
            }
        }
        if let Ok(model) = env::var("EMBED_MODEL") {
            if !model.is_empty() {
                self.embedding.model = Some(model);
            }
        }
        if let Ok(key) = env::var("EMBED_API_KEY") {
            if !key.is_empty() {
                self.embedding.api_key = Some(key);
            }
        }
        if let Ok(dim) = env::var("EMBED_DIM") {
            if let Ok(parsed) = dim.parse() {
                self.embedding.dimension = parsed;
            }
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for raw in [&self.source.base_url, &self.source.list_url] {
            if Url::parse(raw).is_err() {
                return Err(ConfigError::InvalidUrl(raw.clone()));
            }
        }
        if !(1..=500).contains(&self.source.page_size) {
            return Err(ConfigError::InvalidPageSize(self.source.page_size));
        }
        for timeout in [
            self.source.timeout_seconds,
            self.summarizer.timeout_seconds,
            self.embedding.timeout_seconds,
        ] {
            if !(1..=600).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }
        if !(1..=100).contains(&self.database.max_connections) {
            return Err(ConfigError::InvalidMaxConnections(
                self.database.max_connections,
            ));
        }
        if !(0.0..=2.0).contains(&self.summarizer.temperature) {
            return Err(ConfigError::InvalidTemperature(self.summarizer.temperature));
        }
        if !(1..=32768).contains(&self.summarizer.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.summarizer.max_tokens));
        }
        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }
        if !(200..=20000).contains(&self.embedding.max_input_chars) {
            return Err(ConfigError::InvalidEmbedInputLimit(
                self.embedding.max_input_chars,
            ));
        }
        for ttl in [
            self.cache.today_ttl_hours,
            self.cache.page_ttl_days,
            self.cache.detail_ttl_days,
        ] {
            if ttl == 0 {
                return Err(ConfigError::InvalidCacheTtl(ttl));
            }
        }
        if !(1..=100).contains(&self.cache.page_limit) {
            return Err(ConfigError::InvalidPageLimit(self.cache.page_limit));
        }
        if self.ranking.recency_weight < 0.0 || !self.ranking.recency_weight.is_finite() {
            return Err(ConfigError::InvalidRecencyWeight(
                self.ranking.recency_weight,
            ));
        }
        if self.ranking.half_life_days < 1.0 || !self.ranking.half_life_days.is_finite() {
            return Err(ConfigError::InvalidHalfLife(self.ranking.half_life_days));
        }
        if let Some(max_age) = self.ranking.max_age_days {
            if max_age < 1 {
                return Err(ConfigError::InvalidMaxAge(max_age));
            }
        }
        Ok(())
    }

    /// Connection string, with the fatal missing-configuration error the
    /// startup path relies on.
    #[inline]
    pub fn database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                crate::IngestError::Config(
                    "DATABASE_URL is not configured; set it in config.toml or the environment"
                        .to_string(),
                )
                .into()
            })
    }

    /// Render the config for `config --show`, masking credentials.
    #[inline]
    pub fn display_masked(&self) -> Result<String> {
        let mut masked = self.clone();
        if masked.summarizer.api_key.is_some() {
            masked.summarizer.api_key = Some("********".to_string());
        }
        if masked.embedding.api_key.is_some() {
            masked.embedding.api_key = Some("********".to_string());
        }
        if masked.database.url.is_some() {
            masked.database.url = Some("********".to_string());
        }
        toml::to_string_pretty(&masked).context("Failed to serialize config")
    }
}

/// Default config directory, `~/.config/bulletin-ingest` on Linux.
#[inline]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bulletin-ingest"))
}
