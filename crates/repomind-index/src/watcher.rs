//! Keeps the index current while files change on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::indexer::CodeIndexer;
use crate::languages::is_indexable;

const DEBOUNCE: Duration = Duration::from_secs(1);

pub struct IndexWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch `root` recursively. Changed files accepted by the indexer's
    /// selector are re-indexed; deleted ones are removed from the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(root: &Path, indexer: Arc<CodeIndexer>) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(64);

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let paths: HashSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any && is_indexable(&e.path))
                    .map(|e| e.path)
                    .collect();

                for path in paths {
                    let _ = notify_tx.blocking_send(path);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        // Event paths are absolute.
        let root = root.canonicalize()?;
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(path) = notify_rx.recv().await {
                if path.exists() && !indexer.selector().accepts(&root, &path) {
                    tracing::trace!(path = %path.display(), "not selected, ignored");
                    continue;
                }
                match indexer.reindex_file(&root, &path).await {
                    Ok(chunks) => {
                        tracing::debug!(path = %path.display(), chunks, "reindexed");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "reindex failed: {e:#}");
                    }
                }
            }
        });

        Ok(Self { _handle: handle })
    }
}

#[cfg(test)]
mod tests {
    use repomind_store::InMemoryVectorStore;

    use super::*;
    use crate::config::Config;
    use crate::embed::HashingEmbedder;
    use crate::store::IndexStore;

    fn create_test_indexer() -> Arc<CodeIndexer> {
        let store = Arc::new(IndexStore::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashingEmbedder::new(16)),
        ));
        Arc::new(CodeIndexer::new(store, &Config::default()))
    }

    #[tokio::test]
    async fn start_with_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = IndexWatcher::start(dir.path(), create_test_indexer());
        assert!(watcher.is_ok());
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let result = IndexWatcher::start(Path::new("/nonexistent/path/xyz"), create_test_indexer());
        assert!(result.is_err());
    }
}
