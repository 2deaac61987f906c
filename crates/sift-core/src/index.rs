//! Index pipeline: load → chunk → embed → build → save.
//!
//! Any failure aborts before the snapshot is written, and the snapshot itself is
//! written atomically, so a previously saved index is never replaced by a partial one.

use std::path::Path;

use tracing::{info, warn};

use crate::chunks::Chunker;
use crate::documents::{load_documents, Document, ScanError};
use crate::embed::{Embedder, EmbeddingError};
use crate::store::{StoreError, VectorIndex};

/// Runs the full pipeline over `documents` and persists the result at `index_path`.
/// Returns the built index.
pub async fn ingest<I>(
    documents: I,
    chunker: &Chunker,
    embedder: &Embedder,
    index_path: &Path,
) -> Result<VectorIndex, IngestError>
where
    I: IntoIterator<Item = Document>,
{
    let docs: Vec<Document> = documents.into_iter().collect();
    let chunks = chunker.split_all(&docs);
    info!(
        documents = docs.len(),
        chunks = chunks.len(),
        chunk_size = chunker.chunk_size(),
        overlap = chunker.overlap(),
        "Chunked corpus"
    );
    drop(docs);

    if chunks.is_empty() {
        warn!("No text to index; saving an empty index");
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await?;

    let index = VectorIndex::build(vectors.into_iter().zip(chunks).collect())?.with_model(embedder.model());
    index.save(index_path)?;

    info!(
        entries = index.len(),
        dimension = index.dimension(),
        path = %index_path.display(),
        "Ingestion complete"
    );
    Ok(index)
}

/// Loads the corpus at `root` (a directory or a single file) and ingests it.
pub async fn build_index(
    root: &Path,
    chunker: &Chunker,
    embedder: &Embedder,
    index_path: &Path,
) -> Result<VectorIndex, IngestError> {
    let docs = load_documents(root)?;
    ingest(docs, chunker, embedder, index_path).await
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("index error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::embed::{EmbedSettings, EmbeddingProvider, HashEmbedding, ProviderError, Vector};

    fn docs() -> Vec<Document> {
        vec![
            Document::new("cats.md", "Cats are mammals. Dogs are mammals too."),
            Document::new("birds.md", "Birds lay eggs.\n\nPenguins cannot fly."),
        ]
    }

    #[tokio::test]
    async fn ingest_builds_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sift");
        let chunker = Chunker::new(20, 5).unwrap();
        let embedder = Embedder::new(Arc::new(HashEmbedding::new(8)), EmbedSettings::default());

        let index = ingest(docs(), &chunker, &embedder, &path).await.unwrap();
        let expected = chunker.split_all(&docs()).len();
        assert_eq!(index.len(), expected);
        assert_eq!(index.dimension(), 8);
        assert_eq!(index.model(), Some("hash-8"));

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.entries()[0].source, "cats.md");
    }

    #[tokio::test]
    async fn embedding_failure_leaves_previous_index_alone() {
        struct Broken;

        #[async_trait]
        impl EmbeddingProvider for Broken {
            async fn embed(&self, _texts: &[String]) -> Result<Vec<Vector>, ProviderError> {
                Err(ProviderError::Permanent("model not found".into()))
            }

            fn model(&self) -> &str {
                "broken"
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sift");
        let chunker = Chunker::new(20, 5).unwrap();
        let good = Embedder::new(Arc::new(HashEmbedding::new(4)), EmbedSettings::default());
        let before = ingest(docs(), &chunker, &good, &path).await.unwrap();

        let broken = Embedder::new(Arc::new(Broken), EmbedSettings::default());
        let err = ingest(docs(), &chunker, &broken, &path).await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(EmbeddingError::Permanent { batch: 0, .. })));
        assert_eq!(VectorIndex::load(&path).unwrap().entries(), before.entries());
    }

    #[tokio::test]
    async fn build_index_reads_a_directory() {
        let corpus = tempfile::tempdir().unwrap();
        std::fs::write(corpus.path().join("a.txt"), "alpha beta").unwrap();
        std::fs::write(corpus.path().join("b.md"), "gamma delta").unwrap();
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("index.sift");

        let chunker = Chunker::new(100, 10).unwrap();
        let embedder = Embedder::new(Arc::new(HashEmbedding::new(4)), EmbedSettings::default());
        let index = build_index(corpus.path(), &chunker, &embedder, &path).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_corpus_is_a_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = Chunker::new(100, 10).unwrap();
        let embedder = Embedder::new(Arc::new(HashEmbedding::new(4)), EmbedSettings::default());
        let err = build_index(&dir.path().join("missing"), &chunker, &embedder, &dir.path().join("i"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Scan(_)));
        assert!(!dir.path().join("i").exists());
    }
}
