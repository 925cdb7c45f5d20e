//! Syntax-aware codebase indexing, repository maps and hybrid retrieval.
//!
//! The pipeline selects files with gitignore-style rules, parses them with
//! tree-sitter into imports and definitions, cuts them into non-overlapping
//! chunks, embeds and stores documents and chunks, and answers queries by
//! fusing vector similarity with import-derived relationships between files.

pub mod chunker;
pub mod config;
pub mod context;
pub mod document;
pub mod embed;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod parser;
pub mod pattern;
pub mod repo_map;
pub mod retriever;
pub mod selector;
pub mod store;
pub mod watcher;

pub use chunker::Chunker;
pub use config::Config;
pub use context::{contextualize_for_embedding, estimate_tokens};
pub use document::{Chunk, ChunkKind, Document, DocumentMetadata};
pub use embed::{EmbedFuture, Embedder, HashingEmbedder};
pub use error::{EmbedError, IndexError, Result};
pub use indexer::{CodeIndexer, IndexOutcome, IndexReport};
pub use languages::Lang;
pub use parser::SymbolParser;
pub use pattern::{Pattern, PatternSet};
pub use repo_map::{ImportResolver, PathImportResolver, RepoMap};
pub use retriever::{HybridRetriever, RetrievalResult, format_as_context};
pub use selector::{FileSelector, Selection};
pub use store::IndexStore;
pub use watcher::IndexWatcher;
