//! Retrieval pipeline: load the index once at startup, then turn questions into
//! ranked context chunks.
//!
//! States: `Uninitialized` → `Ready` on a successful load, or `Failed` if the load
//! fails. `Failed` is terminal for the process; fix the data and restart.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::embed::{Embedder, EmbeddingError};
use crate::store::{QueryResult, StoreError, VectorIndex};

#[derive(Debug)]
enum State {
    Uninitialized,
    Ready(Arc<VectorIndex>),
    Failed(String),
}

/// Holds the embedder and the loaded index for the life of the process.
///
/// After startup the retriever is only read, so it can be shared behind an
/// `Arc` and queried concurrently.
#[derive(Debug)]
pub struct Retriever {
    embedder: Embedder,
    state: State,
}

impl Retriever {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            state: State::Uninitialized,
        }
    }

    /// A retriever over an index that is already in memory (e.g. fresh from ingestion).
    pub fn ready(embedder: Embedder, index: Arc<VectorIndex>) -> Result<Self, RetrievalError> {
        check_model(&embedder, &index)?;
        Ok(Self {
            embedder,
            state: State::Ready(index),
        })
    }

    /// Loads the index snapshot. Only the first call can succeed.
    pub fn load(&mut self, path: &Path) -> Result<(), RetrievalError> {
        match &self.state {
            State::Ready(_) => return Err(RetrievalError::AlreadyLoaded),
            State::Failed(reason) => return Err(RetrievalError::LoadFailed(reason.clone())),
            State::Uninitialized => {}
        }

        let loaded = VectorIndex::load(path)
            .map_err(RetrievalError::from)
            .and_then(|index| check_model(&self.embedder, &index).map(|()| index));
        match loaded {
            Ok(index) => {
                info!(path = %path.display(), entries = index.len(), "Retriever ready");
                self.state = State::Ready(Arc::new(index));
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Index load failed; restart required");
                self.state = State::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// The loaded index, once ready.
    pub fn index(&self) -> Option<&Arc<VectorIndex>> {
        match &self.state {
            State::Ready(index) => Some(index),
            _ => None,
        }
    }

    /// Embeds the question and returns the `k` most similar chunks.
    pub async fn answer_context(&self, question: &str, k: usize) -> Result<QueryResult, RetrievalError> {
        let index = match &self.state {
            State::Ready(index) => index,
            State::Uninitialized => return Err(RetrievalError::NotReady),
            State::Failed(reason) => return Err(RetrievalError::LoadFailed(reason.clone())),
        };
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }
        let vector = self.embedder.embed_one(question).await?;
        Ok(index.query(&vector, k)?)
    }
}

/// Refuses an index whose recorded model differs from the embedder's.
fn check_model(embedder: &Embedder, index: &VectorIndex) -> Result<(), RetrievalError> {
    match index.model() {
        Some(model) if model != embedder.model() => Err(RetrievalError::ModelMismatch {
            index: model.to_string(),
            embedder: embedder.model().to_string(),
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("retriever has no index loaded")]
    NotReady,
    #[error("index already loaded")]
    AlreadyLoaded,
    #[error("index load failed earlier ({0}); restart after fixing the index")]
    LoadFailed(String),
    #[error("question is empty")]
    EmptyQuestion,
    #[error("index was built with model {index:?} but the embedder uses {embedder:?}")]
    ModelMismatch { index: String, embedder: String },
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("index error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::Chunk;
    use crate::embed::{EmbedSettings, HashEmbedding};

    fn embedder(dim: usize) -> Embedder {
        Embedder::new(Arc::new(HashEmbedding::new(dim)), EmbedSettings::default())
    }

    fn index_of(texts: &[&str], dim: usize) -> VectorIndex {
        let provider = HashEmbedding::new(dim);
        VectorIndex::build(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    (
                        provider.vector_for(t),
                        Chunk {
                            text: t.to_string(),
                            start_offset: 0,
                            source: "s".into(),
                            sequence_index: i,
                        },
                    )
                })
                .collect(),
        )
        .unwrap()
        .with_model(format!("hash-{}", dim))
    }

    #[tokio::test]
    async fn uninitialized_refuses_queries() {
        let r = Retriever::new(embedder(4));
        assert!(!r.is_ready());
        assert!(matches!(r.answer_context("hi", 1).await, Err(RetrievalError::NotReady)));
    }

    #[tokio::test]
    async fn load_then_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sift");
        index_of(&["alpha", "beta", "gamma"], 16).save(&path).unwrap();

        let mut r = Retriever::new(embedder(16));
        r.load(&path).unwrap();
        assert!(r.is_ready());
        let hits = r.answer_context("beta", 2).await.unwrap();
        assert_eq!(hits[0].text, "beta");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(matches!(r.load(&path), Err(RetrievalError::AlreadyLoaded)));
    }

    #[tokio::test]
    async fn failed_load_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sift");

        let mut r = Retriever::new(embedder(16));
        assert!(matches!(r.load(&path), Err(RetrievalError::Store(StoreError::Io(_)))));

        // Even once the file appears, this retriever stays failed.
        index_of(&["alpha"], 16).save(&path).unwrap();
        assert!(matches!(r.load(&path), Err(RetrievalError::LoadFailed(_))));
        assert!(matches!(r.answer_context("alpha", 1).await, Err(RetrievalError::LoadFailed(_))));
    }

    #[tokio::test]
    async fn model_mismatch_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sift");
        index_of(&["alpha"], 16).save(&path).unwrap();

        let mut r = Retriever::new(embedder(8));
        assert!(matches!(r.load(&path), Err(RetrievalError::ModelMismatch { .. })));
        assert!(!r.is_ready());
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let r = Retriever::ready(embedder(4), Arc::new(index_of(&["alpha"], 4))).unwrap();
        assert!(matches!(r.answer_context("   ", 1).await, Err(RetrievalError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn empty_index_surfaces_as_error() {
        let r = Retriever::ready(embedder(4), Arc::new(VectorIndex::build(Vec::new()).unwrap())).unwrap();
        assert!(matches!(
            r.answer_context("anything", 3).await,
            Err(RetrievalError::Store(StoreError::EmptyIndex))
        ));
    }

    #[tokio::test]
    async fn concurrent_questions_share_the_retriever() {
        let r = Arc::new(Retriever::ready(embedder(16), Arc::new(index_of(&["a", "b", "c", "d"], 16))).unwrap());
        let tasks: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|q| {
                let r = Arc::clone(&r);
                tokio::spawn(async move { (q, r.answer_context(q, 1).await.unwrap()) })
            })
            .collect();
        for task in tasks {
            let (q, hits) = task.await.unwrap();
            assert_eq!(hits[0].text, q);
        }
    }
}
