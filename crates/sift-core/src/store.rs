//! Vector index over chunk embeddings: exact cosine search plus atomic snapshot
//! persistence.
//!
//! The index is built once from a batch of entries (or loaded from a snapshot) and
//! is read-only afterwards, so `query` takes `&self` and can be called from many
//! threads at once without locking. Search is a brute-force scan over every entry.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunks::Chunk;
use crate::embed::Vector;

/// Leading bytes of every snapshot file.
const MAGIC: &[u8; 8] = b"SIFTIDX\0";
/// Bumped whenever the snapshot layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// One stored chunk with its embedding. Owned exclusively by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vector,
    pub text: String,
    pub source: String,
    pub sequence_index: usize,
}

/// A query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Entry id: position in build order.
    pub id: usize,
    pub text: String,
    pub source: String,
    pub sequence_index: usize,
    /// Cosine similarity with the query, in [-1, 1].
    pub score: f32,
}

/// Hits sorted by descending score, ties by ascending id.
pub type QueryResult = Vec<ScoredChunk>;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    dimension: usize,
    model: Option<String>,
    count: usize,
}

#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    dimension: usize,
    model: Option<String>,
    entries: Vec<IndexEntry>,
    /// Unit-length copies of the entry vectors, row-major, for dot-product scoring.
    normalized: Vec<f32>,
}

impl VectorIndex {
    /// Builds an index over exactly these entries; ids follow input order.
    /// All vectors must share one non-zero length.
    pub fn build(items: Vec<(Vector, Chunk)>) -> Result<Self, StoreError> {
        let entries = items
            .into_iter()
            .map(|(vector, chunk)| IndexEntry {
                vector,
                text: chunk.text,
                source: chunk.source,
                sequence_index: chunk.sequence_index,
            })
            .collect();
        Self::from_entries(entries, None)
    }

    /// Records which embedding model produced the vectors.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn from_entries(entries: Vec<IndexEntry>, model: Option<String>) -> Result<Self, StoreError> {
        let dimension = entries.first().map_or(0, |e| e.vector.len());
        if !entries.is_empty() && dimension == 0 {
            return Err(StoreError::EmptyVector);
        }
        let mut normalized = Vec::with_capacity(dimension * entries.len());
        for (id, entry) in entries.iter().enumerate() {
            if entry.vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    got: entry.vector.len(),
                });
            }
            if !entry.vector.iter().all(|x| x.is_finite()) {
                return Err(StoreError::NonFinite { id });
            }
            normalized.extend(normalize(&entry.vector));
        }
        Ok(Self {
            dimension,
            model,
            entries,
            normalized,
        })
    }

    /// The `k` entries most similar to `vector` by cosine similarity.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<QueryResult, StoreError> {
        if self.entries.is_empty() {
            return Err(StoreError::EmptyIndex);
        }
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        if k == 0 {
            return Err(StoreError::InvalidK);
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(StoreError::NonFiniteQuery);
        }

        let q = normalize(vector);
        let mut scored: Vec<(usize, f32)> = self
            .normalized
            .chunks_exact(self.dimension)
            .map(|row| dot(&q, row))
            .enumerate()
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, score)| {
                let e = &self.entries[id];
                ScoredChunk {
                    id,
                    text: e.text.clone(),
                    source: e.source.clone(),
                    sequence_index: e.sequence_index,
                    score,
                }
            })
            .collect())
    }

    /// Writes a snapshot to `path` via a temporary file in the same directory,
    /// renamed into place only after it is fully written and synced.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let header = SnapshotHeader {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            model: self.model.clone(),
            count: self.entries.len(),
        };
        let config = bincode::config::standard();

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            w.write_all(MAGIC)?;
            bincode::serde::encode_into_std_write(&header, &mut w, config)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            bincode::serde::encode_into_std_write(&self.entries, &mut w, config)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        // The rename itself only survives a crash once the directory is synced.
        #[cfg(unix)]
        File::open(dir)?.sync_all()?;

        info!(
            path = %path.display(),
            entries = self.entries.len(),
            dimension = self.dimension,
            "Index saved"
        );
        Ok(())
    }

    /// Restores an index from a snapshot written by [`VectorIndex::save`]. The whole
    /// snapshot is validated before anything is returned.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| StoreError::Corrupt("not a sift index (bad magic)".into()))?;
        let config = bincode::config::standard();

        let (header, used): (SnapshotHeader, usize) = bincode::serde::decode_from_slice(body, config)
            .map_err(|e| StoreError::Corrupt(format!("unreadable header: {}", e)))?;
        if header.version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version {} (expected {})",
                header.version, FORMAT_VERSION
            )));
        }

        let rest = &body[used..];
        let (entries, used): (Vec<IndexEntry>, usize) = bincode::serde::decode_from_slice(rest, config)
            .map_err(|e| StoreError::Corrupt(format!("unreadable entries: {}", e)))?;
        if used != rest.len() {
            return Err(StoreError::Corrupt(format!("{} trailing bytes", rest.len() - used)));
        }
        if entries.len() != header.count {
            return Err(StoreError::Corrupt(format!(
                "header declares {} entries, found {}",
                header.count,
                entries.len()
            )));
        }
        if let Some((id, e)) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.vector.len() != header.dimension)
        {
            return Err(StoreError::Corrupt(format!(
                "entry {} has {} dimensions, header says {}",
                id,
                e.vector.len(),
                header.dimension
            )));
        }
        if !entries.is_empty() && header.dimension == 0 {
            return Err(StoreError::Corrupt("zero dimension with entries present".into()));
        }

        let index = Self::from_entries(entries, header.model)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        info!(
            path = %path.display(),
            entries = index.len(),
            dimension = index.dimension,
            "Index loaded"
        );
        Ok(index)
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector length shared by all entries (0 for an empty index).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vectors must have at least one dimension")]
    EmptyVector,
    #[error("index is empty")]
    EmptyIndex,
    #[error("k must be at least 1")]
    InvalidK,
    #[error("entry {id} has a NaN or infinite component")]
    NonFinite { id: usize },
    #[error("query vector has a NaN or infinite component")]
    NonFiniteQuery,
    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode index: {0}")]
    Encode(String),
    #[error("corrupt index: {0}")]
    Corrupt(String),
}
