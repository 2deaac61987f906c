//! Keeps the persisted index in step with the corpus directory.
//!
//! File events are debounced, then each burst triggers one full rebuild (load →
//! chunk → embed → save). Events that arrive while a rebuild is running are folded
//! into the next one, so rebuilds never overlap.

use std::path::PathBuf;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chunks::Chunker;
use crate::embed::Embedder;
use crate::index::{build_index, IngestError};
use crate::store::VectorIndex;

const DEBOUNCE: Duration = Duration::from_millis(400);

/// Everything needed to rebuild the index for one corpus.
#[derive(Debug, Clone)]
pub struct Rebuilder {
    root: PathBuf,
    chunker: Chunker,
    embedder: Embedder,
    index_path: PathBuf,
}

impl Rebuilder {
    pub fn new(root: PathBuf, chunker: Chunker, embedder: Embedder, index_path: PathBuf) -> Self {
        Self {
            root,
            chunker,
            embedder,
            index_path,
        }
    }

    /// Rebuilds from the current state of the corpus. On failure the previous
    /// snapshot stays in place.
    pub async fn rebuild(&self) -> Result<VectorIndex, IngestError> {
        build_index(&self.root, &self.chunker, &self.embedder, &self.index_path).await
    }

    /// Watches the corpus and rebuilds after every debounced burst of changes.
    /// Failed rebuilds are logged and watching continues. Returns only on setup failure.
    pub async fn watch(&self) -> Result<(), WatchError> {
        if !self.root.is_dir() {
            return Err(WatchError::NotADirectory(self.root.clone()));
        }
        let root = self.root.canonicalize().map_err(WatchError::Canonicalize)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
        let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
            Ok(events) => {
                debug!(events = events.len(), "Corpus changed");
                // Receiver gone means the watch loop ended; nothing to notify.
                let _ = tx.send(events.len());
            }
            Err(e) => warn!(error = %e, "Watcher error"),
        })
        .map_err(|e| WatchError::Notify(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch(e.to_string()))?;
        info!(root = %root.display(), index = %self.index_path.display(), "Watching corpus");

        while let Some(mut events) = rx.recv().await {
            while let Ok(more) = rx.try_recv() {
                events += more;
            }
            match self.rebuild().await {
                Ok(index) => info!(events, entries = index.len(), "Index rebuilt"),
                Err(e) => warn!(error = %e, "Rebuild failed; keeping previous index"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::embed::{EmbedSettings, HashEmbedding};

    fn rebuilder(root: PathBuf, index_path: PathBuf) -> Rebuilder {
        let embedder = Embedder::new(Arc::new(HashEmbedding::new(8)), EmbedSettings::default());
        Rebuilder::new(root, Chunker::new(50, 5).unwrap(), embedder, index_path)
    }

    #[tokio::test]
    async fn refuses_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "x").unwrap();
        let r = rebuilder(file, dir.path().join("index.sift"));
        assert!(matches!(r.watch().await, Err(WatchError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn rebuild_reflects_the_corpus_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(corpus.join("a.md"), "Cats purr.").unwrap();
        let r = rebuilder(corpus.clone(), dir.path().join("index.sift"));

        assert_eq!(r.rebuild().await.unwrap().len(), 1);
        std::fs::write(corpus.join("b.md"), "Dogs bark.").unwrap();
        assert_eq!(r.rebuild().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn change_on_disk_triggers_a_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(corpus.join("a.md"), "Cats purr.").unwrap();
        let index_path = dir.path().join("index.sift");
        let r = rebuilder(corpus.clone(), index_path.clone());

        let edit_and_wait = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::write(corpus.join("b.md"), "Dogs bark.").unwrap();
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if let Ok(index) = VectorIndex::load(&index_path) {
                    if index.len() == 2 {
                        return index;
                    }
                }
            }
            panic!("index was not rebuilt after the change");
        };

        tokio::select! {
            res = r.watch() => panic!("watch returned early: {:?}", res),
            index = edit_and_wait => assert_eq!(index.model(), Some("hash-8")),
        }
    }
}
