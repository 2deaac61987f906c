//! Persisted config (corpus root, index location, chunking, Ollama settings) in the
//! app data directory.
//!
//! Loaded and validated once at startup; everything downstream receives plain
//! values from it instead of reading the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::embed::{EmbedSettings, RetryPolicy};
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_GENERATE_MODEL};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the user's corpus directory (chosen by them).
    pub notes_root: Option<String>,
    /// Where the vector index is persisted. Defaults to the app data directory.
    pub index_path: Option<String>,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    /// Texts per provider request.
    pub batch_size: usize,
    /// Provider requests allowed in flight at once.
    pub max_in_flight: usize,
    /// Attempts per batch, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let settings = EmbedSettings::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            batch_size: settings.batch_size,
            max_in_flight: settings.max_in_flight,
            max_attempts: settings.retry.max_attempts,
            initial_backoff_ms: settings.retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: settings.retry.max_backoff.as_millis() as u64,
        }
    }
}

impl EmbeddingConfig {
    pub fn embed_settings(&self) -> EmbedSettings {
        EmbedSettings {
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    /// Chunks retrieved as context per question.
    pub top_k: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATE_MODEL.to_string(),
            top_k: 3,
        }
    }
}

impl Config {
    /// Rejects settings the pipelines can't run with. Call once after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunking(self.chunking.chunk_size, self.chunking.overlap)?;

        let e = &self.embedding;
        url::Url::parse(&e.base_url)
            .map_err(|err| ConfigError::Invalid(format!("embedding.base_url {:?}: {}", e.base_url, err)))?;
        if e.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model is empty".into()));
        }
        if e.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be at least 1".into()));
        }
        if e.max_in_flight == 0 {
            return Err(ConfigError::Invalid("embedding.max_in_flight must be at least 1".into()));
        }
        if e.max_attempts == 0 {
            return Err(ConfigError::Invalid("embedding.max_attempts must be at least 1".into()));
        }
        if e.initial_backoff_ms > e.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "embedding.initial_backoff_ms exceeds embedding.max_backoff_ms".into(),
            ));
        }

        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::Invalid("generation.model is empty".into()));
        }
        if self.generation.top_k == 0 {
            return Err(ConfigError::Invalid("generation.top_k must be at least 1".into()));
        }
        Ok(())
    }

    /// Configured index path, or the default one in the app data directory.
    pub fn index_path(&self) -> Option<PathBuf> {
        self.index_path
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(app_data::default_index_path)
    }
}

/// Chunking parameters are character counts; overlap must leave room for new text.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<(), ConfigError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ConfigError::InvalidChunking { chunk_size, overlap });
    }
    Ok(())
}

/// Load config from the app data directory. Returns default config if there is none yet.
pub fn load_config() -> Result<Config, ConfigError> {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Ok(Config::default());
    };
    let path = data_dir.join(CONFIG_FILENAME);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config_from(&path)
}

/// Load config from an explicit file. A file that exists but doesn't parse is an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    toml::from_str(&s).map_err(ConfigError::Parse)
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(&data_dir.join(CONFIG_FILENAME), config)
}

/// Save config to an explicit file.
pub fn save_config_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Get the configured corpus root path, if any.
pub fn get_notes_root(config: &Config) -> Option<PathBuf> {
    config
        .notes_root
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Set and persist the corpus root, in `config_file` when given, otherwise in the
/// app data directory. A missing explicit file is created from defaults.
pub fn set_notes_root(path: &Path, config_file: Option<&Path>) -> Result<(), ConfigError> {
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let root = Some(path.to_string_lossy().into_owned());
    match config_file {
        Some(file) => {
            let mut config = if file.exists() {
                load_config_from(file)?
            } else {
                Config::default()
            };
            config.notes_root = root;
            save_config_to(file, &config)
        }
        None => {
            let mut config = load_config()?;
            config.notes_root = root;
            save_config(&config)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid chunking: chunk_size={chunk_size}, overlap={overlap} (need 0 <= overlap < chunk_size)")]
    InvalidChunking { chunk_size: usize, overlap: usize },
    #[error("invalid config: {0}")]
    Invalid(String),
}
