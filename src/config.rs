use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SigmarisConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub compaction: CompactionConfig,
    pub evolution: EvolutionConfig,
    pub reflection: ReflectionConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Growth-log rows kept per user; older rows are trimmed on append.
    pub growth_log_retention: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompactionConfig {
    pub threshold: usize,
    pub keep_recent: usize,
    pub max_chars: usize,
    pub fallback_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Half-width of the uniform drift applied to every trait per evolution.
    pub jitter: f64,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Weight of the message's emotion reading when blended into the traits.
    pub observed_weight: f64,
    /// Largest distance an emotion reading may sit from the current traits;
    /// farther readings are pulled in to this radius before blending.
    pub max_observed_step: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReflectionConfig {
    pub meta_every_turns: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_sigmaris_dir()
            .join("persona.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            growth_log_retention: 2000,
        }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 120,
            keep_recent: 24,
            max_chars: 4000,
            fallback_chars: 1200,
        }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            jitter: 0.005,
            seed: None,
            observed_weight: 0.35,
            max_observed_step: 0.40,
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { meta_every_turns: 1 }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
            temperature: 0.7,
        }
    }
}

/// Returns `~/.sigmaris/`, or `./.sigmaris/` when no home directory is known.
pub fn default_sigmaris_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sigmaris")
}

/// Returns the default config file path: `~/.sigmaris/config.toml`
pub fn default_config_path() -> PathBuf {
    default_sigmaris_dir().join("config.toml")
}

impl SigmarisConfig {
    /// Load `~/.sigmaris/config.toml` when present, then the `SIGMARIS_*` overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("invalid config in {}", path.display()))?
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            SigmarisConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (SIGMARIS_DB, SIGMARIS_LOG_LEVEL, SIGMARIS_LLM_MODEL, SIGMARIS_LLM_BASE).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SIGMARIS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("SIGMARIS_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("SIGMARIS_LLM_MODEL") {
            self.llm.model = val;
        }
        if let Ok(val) = std::env::var("SIGMARIS_LLM_BASE") {
            self.llm.api_base = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
