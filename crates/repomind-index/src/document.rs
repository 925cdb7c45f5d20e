//! Documents, their structural metadata, and chunks.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::languages::{Lang, detect_language};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Module,
    Class,
    Function,
    Method,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Self::Module),
            "class" => Ok(Self::Class),
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            _ => Err(()),
        }
    }
}

/// Per-file facts gathered when the file is read and filled in by the parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub path: PathBuf,
    pub language: Option<Lang>,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub line_count: usize,
    /// Raw source text of each import, in file order.
    pub imports: Vec<String>,
    pub classes: Vec<String>,
    /// Functions and methods.
    pub functions: Vec<String>,
    /// Declared name → every 1-based line where it is declared.
    pub symbols: BTreeMap<String, Vec<usize>>,
    pub doc_comment: Option<String>,
    pub content_hash: String,
}

/// Contiguous line range of a document; lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    /// Names declared by this chunk.
    pub symbols: Vec<String>,
    /// Enclosing class-like names, outermost first.
    pub parents: Vec<String>,
    pub content_hash: String,
}

impl Chunk {
    /// Primary declared name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Identifier assigned by the index store.
    pub id: Option<String>,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub chunks: Vec<Chunk>,
}

impl Document {
    /// Build an unparsed document from in-memory content.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let metadata = DocumentMetadata {
            language: detect_language(&path),
            size: content.len() as u64,
            line_count: line_count(&content),
            content_hash: content_hash(&content),
            path,
            ..DocumentMetadata::default()
        };
        Self {
            id: None,
            content,
            metadata,
            chunks: Vec::new(),
        }
    }

    /// Read a file from disk. Invalid UTF-8 is replaced lossily.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let meta = std::fs::metadata(path)?;
        let mut doc = Self::new(path, String::from_utf8_lossy(&bytes).into_owned());
        doc.metadata.size = meta.len();
        doc.metadata.modified = meta.modified().ok();
        Ok(doc)
    }

    #[must_use]
    pub fn language(&self) -> Option<Lang> {
        self.metadata.language
    }

    /// Text of lines `start..=end` (1-based), without a trailing newline.
    #[must_use]
    pub fn line_range(&self, start: usize, end: usize) -> String {
        slice_lines(&self.content, start, end)
    }
}

pub(crate) fn slice_lines(content: &str, start: usize, end: usize) -> String {
    content
        .lines()
        .skip(start.saturating_sub(1))
        .take(end.saturating_sub(start) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Index id of `path`: its location relative to `root`, `/`-separated.
/// `None` if the path is outside `root` or climbs out of it.
#[must_use]
pub fn document_id(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() || path.starts_with(root) {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[must_use]
pub fn line_count(content: &str) -> usize {
    content.lines().count()
}

#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
