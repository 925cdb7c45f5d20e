//! Project indexing orchestrator: select → read → parse → chunk → embed → store.
//!
//! Reading, parsing and chunking run on a bounded pool of blocking workers;
//! results are consumed in selection order by a single writer, so store
//! writes are serialized and the run is deterministic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::context::{contextualize_for_embedding, document_embedding_text};
use crate::document::{Chunk, Document, DocumentMetadata, document_id};
use crate::error::{IndexError, Result};
use crate::parser::SymbolParser;
use crate::selector::FileSelector;
use crate::store::{
    ChunkRecord, DOCUMENT_ID_KEY, IndexStore, Metadata, MetadataValue, Scalar, chunk_id, keys,
};

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 8192;

/// Summary of an indexing run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub documents_removed: usize,
    /// Failing document ids with the error message.
    pub failures: Vec<(String, String)>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Report plus the metadata of every document seen, for building a
/// [`RepoMap`](crate::repo_map::RepoMap).
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub report: IndexReport,
    pub documents: Vec<DocumentMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    TooLarge,
}

#[derive(Debug)]
enum Prepared {
    Ready(Document),
    Skipped(SkipReason),
}

/// Orchestrates code indexing over a project tree.
pub struct CodeIndexer {
    store: Arc<IndexStore>,
    selector: FileSelector,
    parser: Arc<SymbolParser>,
    chunker: Arc<Chunker>,
    workers: usize,
    skip_unchanged: bool,
    max_file_size: u64,
}

impl CodeIndexer {
    #[must_use]
    pub fn new(store: Arc<IndexStore>, config: &Config) -> Self {
        Self::with_parser(store, config, Arc::new(SymbolParser::default()))
    }

    #[must_use]
    pub fn with_parser(store: Arc<IndexStore>, config: &Config, parser: Arc<SymbolParser>) -> Self {
        Self {
            selector: FileSelector::new(&config.selector),
            chunker: Arc::new(Chunker::new(config.chunker.clone(), Arc::clone(&parser))),
            parser,
            workers: config.index.worker_count(),
            skip_unchanged: config.index.skip_unchanged,
            max_file_size: config.index.max_file_size,
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    #[must_use]
    pub fn selector(&self) -> &FileSelector {
        &self.selector
    }

    /// Index every selected file under `root`, then drop documents whose
    /// files are gone. Per-file failures are collected in the report.
    /// Cancellation stops the run at the next file boundary and skips the
    /// stale-document cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error only if the existing index cannot be read.
    pub async fn index_project(&self, root: &Path, cancel: &CancellationToken) -> Result<IndexOutcome> {
        let start = std::time::Instant::now();
        let mut outcome = IndexOutcome::default();
        let report = &mut outcome.report;

        let id_root = if root.is_file() {
            root.parent().unwrap_or(root)
        } else {
            root
        };
        let selection = self.selector.collect(root);
        let existing = self.store.document_fields(keys::CONTENT_HASH).await?;

        let files: Vec<(PathBuf, String)> = selection
            .files
            .into_iter()
            .filter_map(|path| {
                let id = document_id(id_root, &path)?;
                Some((path, id))
            })
            .collect();
        let total = files.len();
        tracing::info!(total, workers = self.workers, "indexing started");

        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        let mut prepared = futures::stream::iter(files)
            .map(|(path, id)| self.prepare(path, id))
            .buffered(self.workers.max(1));

        while let Some((id, result)) = prepared.next().await {
            if cancel.is_cancelled() {
                tracing::info!(done = report.files_scanned, total, "indexing cancelled");
                report.cancelled = true;
                break;
            }
            report.files_scanned += 1;

            // Skipped files stay out of `seen`, so a previously indexed copy
            // is dropped by the stale cleanup below.
            let doc = match result {
                Ok(Prepared::Ready(doc)) => {
                    seen.insert(id.clone());
                    doc
                }
                Ok(Prepared::Skipped(reason)) => {
                    tracing::debug!(file = %id, ?reason, "skipped");
                    report.files_skipped += 1;
                    continue;
                }
                Err(e) => {
                    seen.insert(id.clone());
                    tracing::warn!(file = %id, "read failed: {e:#}");
                    report.failures.push((id, e.to_string()));
                    continue;
                }
            };

            if self.skip_unchanged
                && existing
                    .get(&id)
                    .is_some_and(|hash| *hash == doc.metadata.content_hash)
            {
                report.files_unchanged += 1;
                outcome.documents.push(doc.metadata);
                continue;
            }

            match self.write_document(&id, &doc).await {
                Ok(created) => {
                    report.files_indexed += 1;
                    report.chunks_created += created;
                    tracing::info!(
                        file = %id,
                        done = report.files_scanned,
                        total,
                        chunks = created,
                        "indexed"
                    );
                    outcome.documents.push(doc.metadata);
                }
                Err(e) => {
                    tracing::warn!(file = %id, "indexing failed: {e:#}");
                    report.failures.push((id, e.to_string()));
                }
            }
        }
        drop(prepared);

        if !report.cancelled {
            for old in existing.keys().filter(|id| !seen.contains(*id)) {
                match self.store.delete_document(old).await {
                    Ok(_) => report.documents_removed += 1,
                    Err(e) => report.failures.push((old.clone(), format!("cleanup: {e}"))),
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            skipped = report.files_skipped,
            failed = report.failures.len(),
            removed = report.documents_removed,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(outcome)
    }

    /// Re-index one file (for the watcher). A missing, binary or oversized
    /// file is removed from the index instead. Returns the chunks written.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is outside `root`, or reading,
    /// embedding or the store write fails.
    pub async fn reindex_file(&self, root: &Path, path: &Path) -> Result<usize> {
        let id = document_id(root, path)
            .ok_or_else(|| IndexError::Other(format!("{} is outside {}", path.display(), root.display())))?;
        if !path.exists() {
            self.store.delete_document(&id).await?;
            return Ok(0);
        }
        let (_, prepared) = self.prepare(path.to_path_buf(), id.clone()).await;
        match prepared? {
            Prepared::Ready(doc) => self.write_document(&id, &doc).await,
            Prepared::Skipped(reason) => {
                tracing::debug!(file = %id, ?reason, "no longer indexable");
                self.store.delete_document(&id).await?;
                Ok(0)
            }
        }
    }

    /// Drop a file's document and chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is outside `root` or the delete fails.
    pub async fn remove_file(&self, root: &Path, path: &Path) -> Result<usize> {
        let id = document_id(root, path)
            .ok_or_else(|| IndexError::Other(format!("{} is outside {}", path.display(), root.display())))?;
        self.store.delete_document(&id).await
    }

    async fn prepare(&self, path: PathBuf, id: String) -> (String, Result<Prepared>) {
        let parser = Arc::clone(&self.parser);
        let chunker = Arc::clone(&self.chunker);
        let max_size = self.max_file_size;
        let rel = id.clone();
        let result = tokio::task::spawn_blocking(move || {
            prepare_file(&path, &rel, &parser, &chunker, max_size)
        })
        .await
        .map_err(|e| IndexError::Other(format!("parse worker failed: {e}")))
        .and_then(|r| r);
        (id, result)
    }

    async fn write_document(&self, id: &str, doc: &Document) -> Result<usize> {
        let embedder = self.store.embedder();
        let doc_vector = embedder
            .embed(&document_embedding_text(&doc.metadata, &doc.content))
            .await?;

        let mut records = Vec::with_capacity(doc.chunks.len());
        for (idx, chunk) in doc.chunks.iter().enumerate() {
            let text = contextualize_for_embedding(chunk, &doc.metadata);
            let vector = embedder.embed(&text).await?;
            records.push(ChunkRecord {
                id: chunk_id(id, idx),
                content: chunk.content.clone(),
                metadata: chunk_metadata(id, &doc.metadata, chunk),
                embedding: Some(vector),
            });
        }

        let created = self
            .store
            .replace_document(
                id,
                &doc.content,
                &document_metadata(id, &doc.metadata),
                Some(doc_vector),
                records,
            )
            .await?;
        tracing::debug!("{id}: {created} chunks indexed");
        Ok(created)
    }
}

fn prepare_file(
    path: &Path,
    rel: &str,
    parser: &SymbolParser,
    chunker: &Chunker,
    max_size: u64,
) -> Result<Prepared> {
    let meta = std::fs::metadata(path)?;
    if max_size > 0 && meta.len() > max_size {
        return Ok(Prepared::Skipped(SkipReason::TooLarge));
    }
    let bytes = std::fs::read(path)?;
    if looks_binary(&bytes) {
        return Ok(Prepared::Skipped(SkipReason::Binary));
    }

    let mut doc = Document::new(rel, String::from_utf8_lossy(&bytes).into_owned());
    doc.id = Some(rel.to_owned());
    doc.metadata.size = meta.len();
    doc.metadata.modified = meta.modified().ok();

    let structure = parser.parse(&mut doc);
    if structure.is_none() && doc.language().is_some_and(|lang| parser.supports(lang)) {
        tracing::debug!(file = rel, "parse produced no tree, falling back to a module chunk");
    }
    doc.chunks = chunker.chunk_with(&doc, structure.as_ref());
    Ok(Prepared::Ready(doc))
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0)
}

fn lang_value(meta: &DocumentMetadata) -> MetadataValue {
    meta.language.map(|l| l.id()).into()
}

fn document_metadata(id: &str, meta: &DocumentMetadata) -> Metadata {
    let symbols = meta
        .symbols
        .iter()
        .map(|(name, lines)| {
            let lines = lines
                .iter()
                .filter_map(|l| i64::try_from(*l).ok().map(Scalar::Int))
                .collect();
            (name.clone(), MetadataValue::Sequence(lines))
        })
        .collect();
    let modified = meta
        .modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok());

    Metadata::from([
        (DOCUMENT_ID_KEY.to_owned(), id.into()),
        (keys::PATH.to_owned(), meta.path.to_string_lossy().into_owned().into()),
        (keys::LANGUAGE.to_owned(), lang_value(meta)),
        (keys::CONTENT_HASH.to_owned(), meta.content_hash.clone().into()),
        ("size".to_owned(), MetadataValue::Scalar(Scalar::Int(i64::try_from(meta.size).unwrap_or(i64::MAX)))),
        ("line_count".to_owned(), meta.line_count.into()),
        ("modified".to_owned(), modified.into()),
        ("imports".to_owned(), meta.imports.clone().into()),
        ("classes".to_owned(), meta.classes.clone().into()),
        ("functions".to_owned(), meta.functions.clone().into()),
        ("symbols".to_owned(), MetadataValue::Mapping(symbols)),
        ("doc_comment".to_owned(), meta.doc_comment.clone().into()),
    ])
}

fn chunk_metadata(id: &str, meta: &DocumentMetadata, chunk: &Chunk) -> Metadata {
    Metadata::from([
        (DOCUMENT_ID_KEY.to_owned(), id.into()),
        (keys::PATH.to_owned(), meta.path.to_string_lossy().into_owned().into()),
        (keys::LANGUAGE.to_owned(), lang_value(meta)),
        (keys::KIND.to_owned(), chunk.kind.as_str().into()),
        (keys::NAME.to_owned(), chunk.name().map(str::to_owned).into()),
        (keys::PARENTS.to_owned(), chunk.parents.clone().into()),
        (keys::START_LINE.to_owned(), chunk.start_line.into()),
        (keys::END_LINE.to_owned(), chunk.end_line.into()),
        (keys::CONTENT_HASH.to_owned(), chunk.content_hash.clone().into()),
    ])
}
