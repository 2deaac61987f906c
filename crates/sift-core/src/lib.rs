//! All retrieval logic independent of how it is run (CLI or a service shell).
//!
//! The corpus lives in a folder the user chooses. sift stores only its config and
//! the persisted index in its own app data directory (see [app_data]).
//!
//! Ingestion: [documents] → [chunks] → [embed] → [store] (build + save), driven by [index].
//! [watcher] repeats ingestion whenever the corpus changes.
//! Querying: [retrieval] loads the index once and answers `answer_context`; [answer]
//! hands the ranked chunks to a generator.

pub mod answer;
pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embed;
pub mod index;
pub mod ollama;
pub mod retrieval;
pub mod store;
pub mod watcher;

pub use answer::{answer_question, build_prompt, Answer, AnswerError, AnswerGenerator, GenerationError};
pub use app_data::{app_data_dir, default_index_path};
pub use chunks::{Chunk, Chunker};
pub use config::{
    get_notes_root, load_config, load_config_from, save_config_to, set_notes_root, Config, ConfigError,
};
pub use documents::{load_documents, read_document, scan_documents, Document, ScanError};
pub use embed::{
    EmbedSettings, Embedder, EmbeddingError, EmbeddingProvider, HashEmbedding, ProviderError, RetryPolicy, Vector,
};
pub use index::{build_index, ingest, IngestError};
pub use ollama::{OllamaClient, OllamaError};
pub use retrieval::{RetrievalError, Retriever};
pub use store::{IndexEntry, QueryResult, ScoredChunk, StoreError, VectorIndex};
pub use watcher::{Rebuilder, WatchError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "sift-core ready"
}
