//! Language-generation collaborator.
//!
//! Provides the [`LanguageModel`] trait, the [`LlmError`] taxonomy, and
//! [`create_model`] to build a model from configuration. Callers never surface
//! these errors to the end user; every call site owns a local fallback.

pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,

    #[error("language model unavailable: {0}")]
    Unavailable(String),
}

/// Text generation from a system prompt and a user prompt.
///
/// Synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// A model that is never reachable. Every caller falls back to local rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineModel;

impl LanguageModel for OfflineModel {
    fn generate(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("offline provider configured".into()))
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

/// Create a language model from config.
///
/// Supported providers: `"openai"` (any OpenAI-compatible chat endpoint) and
/// `"offline"`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiModel::from_config(config))),
        "offline" => Ok(Arc::new(OfflineModel)),
        other => anyhow::bail!("unknown llm provider: {other}. Supported: openai, offline"),
    }
}
