//! Ollama client for embeddings and answer generation. Wraps ollama-rs with a simple API.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;
use tracing::debug;

use crate::answer::{build_prompt, AnswerGenerator, GenerationError};
use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::embed::{EmbeddingProvider, ProviderError, Vector};
use crate::store::ScoredChunk;

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_GENERATE_MODEL: &str = "llama3.2";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    generate_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generate_model: DEFAULT_GENERATE_MODEL.to_string(),
        })
    }

    /// Create from the validated config sections.
    pub fn from_config(embedding: &EmbeddingConfig, generation: &GenerationConfig) -> Result<Self, OllamaError> {
        Ok(Self::from_url(&embedding.base_url)?
            .with_embed_model(embedding.model.clone())
            .with_generate_model(generation.model.clone()))
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set the completion model (e.g. `llama3.2`, `mistral`).
    pub fn with_generate_model(mut self, model: impl Into<String>) -> Self {
        self.generate_model = model.into();
        self
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>, OllamaError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(OllamaError::Request)?;
        Ok(res.embeddings)
    }

    /// Run a single completion with the generation model.
    pub async fn complete(&self, prompt: String) -> Result<String, OllamaError> {
        debug!(model = %self.generate_model, prompt_len = prompt.len(), "Requesting completion");
        let req = GenerationRequest::new(self.generate_model.clone(), prompt);
        let res = self.inner.generate(req).await.map_err(OllamaError::Request)?;
        Ok(res.response)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>, ProviderError> {
        self.embed_texts(texts).await.map_err(OllamaError::into_provider_error)
    }

    fn model(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl AnswerGenerator for OllamaClient {
    async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String, GenerationError> {
        self.complete(build_prompt(question, context))
            .await
            .map_err(|e| GenerationError(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
}

impl OllamaError {
    /// Connection failures and timeouts are worth retrying; anything the server
    /// rejected or we couldn't decode is not.
    fn into_provider_error(self) -> ProviderError {
        let message = self.to_string();
        match self {
            OllamaError::Request(ollama_rs::error::OllamaError::ReqwestError(e))
                if e.is_timeout() || e.is_connect() =>
            {
                ProviderError::Transient(message)
            }
            _ => ProviderError::Permanent(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(OllamaClient::from_url("not a url"), Err(OllamaError::ParseUrl(_))));
    }

    #[test]
    fn models_come_from_config() {
        let embedding = EmbeddingConfig {
            model: "all-minilm".into(),
            ..EmbeddingConfig::default()
        };
        let client = OllamaClient::from_config(&embedding, &GenerationConfig::default()).unwrap();
        assert_eq!(EmbeddingProvider::model(&client), "all-minilm");
        assert_eq!(client.generate_model, DEFAULT_GENERATE_MODEL);
    }

    #[test]
    fn bad_url_maps_to_permanent() {
        let err = OllamaClient::from_url("::").unwrap_err();
        assert!(matches!(err.into_provider_error(), ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_server() {
        let client = OllamaClient::from_url(DEFAULT_BASE_URL).unwrap();
        assert!(client.embed_texts(&[]).await.unwrap().is_empty());
    }
}
