//! Embedding provider interface and the batching/retrying adapter around it.
//!
//! - [`EmbeddingProvider`] is the black box that turns texts into vectors
//!   (Ollama in production, see [`crate::ollama`]).
//! - [`Embedder`] splits input into bounded batches, runs up to `max_in_flight`
//!   of them at once, retries transient failures with exponential backoff, and
//!   reassembles results in input order.
//! - [`HashEmbedding`] provides deterministic hash-based vectors for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One embedding: a fixed-length vector of floats.
pub type Vector = Vec<f32>;

/// Service that maps texts to vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>, ProviderError>;

    /// Identifies the model, so vectors from different models are never mixed.
    fn model(&self) -> &str;
}

/// How a provider call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network trouble or a timeout; worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Bad input, unknown model, exhausted quota; retrying won't help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per batch, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedSettings {
    /// Texts per provider request.
    pub batch_size: usize,
    /// Provider requests allowed in flight at once.
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_in_flight: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Batching, retrying front for an [`EmbeddingProvider`]. Cheap to clone.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    settings: EmbedSettings,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: EmbedSettings) -> Self {
        let settings = EmbedSettings {
            batch_size: settings.batch_size.max(1),
            max_in_flight: settings.max_in_flight.max(1),
            retry: RetryPolicy {
                max_attempts: settings.retry.max_attempts.max(1),
                ..settings.retry
            },
        };
        Self { provider, settings }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn settings(&self) -> &EmbedSettings {
        &self.settings
    }

    /// Embed many texts. Returns one vector per input, in input order.
    /// The first batch to fail, in completion order, aborts the whole call and
    /// drops the batches still in flight.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<&[String]> = texts.chunks(self.settings.batch_size).collect();
        info!(
            texts = texts.len(),
            batches = batches.len(),
            max_in_flight = self.settings.max_in_flight,
            model = self.model(),
            "Embedding texts"
        );

        let mut per_batch: Vec<Option<Vec<Vector>>> = vec![None; batches.len()];
        let batches = &batches;
        let mut completed = std::pin::pin!(stream::iter(0..batches.len())
            .map(|i| {
                let batch = batches[i];
                async move { self.embed_with_retry(i, batch).await.map(|v| (i, v)) }
            })
            .buffer_unordered(self.settings.max_in_flight));
        while let Some((i, vectors)) = completed.try_next().await? {
            per_batch[i] = Some(vectors);
        }

        Ok(per_batch.into_iter().flatten().flatten().collect())
    }

    /// Embed a single text (e.g. a question).
    pub async fn embed_one(&self, text: &str) -> Result<Vector, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            batch: 0,
            expected: 1,
            got: 0,
        })
    }

    async fn embed_with_retry(&self, batch: usize, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError> {
        let policy = self.settings.retry;
        let mut attempt = 1;
        loop {
            match self.provider.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    debug!(batch, size = texts.len(), attempt, "Batch embedded");
                    return Ok(vectors);
                }
                Ok(vectors) => {
                    return Err(EmbeddingError::CountMismatch {
                        batch,
                        expected: texts.len(),
                        got: vectors.len(),
                    });
                }
                Err(ProviderError::Permanent(message)) => {
                    return Err(EmbeddingError::Permanent { batch, message });
                }
                Err(ProviderError::Transient(message)) if attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        batch,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(ProviderError::Transient(message)) => {
                    return Err(EmbeddingError::RetriesExhausted {
                        batch,
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding batch {batch} failed: {message}")]
    Permanent { batch: usize, message: String },
    #[error("embedding batch {batch} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        batch: usize,
        attempts: u32,
        message: String,
    },
    #[error("embedding batch {batch} returned {got} vectors for {expected} texts")]
    CountMismatch {
        batch: usize,
        expected: usize,
        got: usize,
    },
}

impl EmbeddingError {
    /// Index of the batch that failed.
    pub fn batch(&self) -> usize {
        match self {
            Self::Permanent { batch, .. }
            | Self::RetriesExhausted { batch, .. }
            | Self::CountMismatch { batch, .. } => *batch,
        }
    }
}

/// Provider that returns deterministic unit vectors derived from a BLAKE3 hash of the text.
///
/// Identical inputs always produce identical outputs, so ingestion and search can
/// be exercised without a running model server.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    model: String,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("hash-{}", dimension),
        }
    }

    /// Components come from the BLAKE3 output stream of the text, so the vectors
    /// are the same on every platform and toolchain.
    pub fn vector_for(&self, text: &str) -> Vector {
        let mut bytes = vec![0u8; self.dimension * 4];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);
        let mut v: Vector = bytes
            .chunks_exact(4)
            .map(|b| {
                let x = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                ((x as f64 / u32::MAX as f64) * 2.0 - 1.0) as f32
            })
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>, ProviderError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
