//! Embedding text generation and token estimates.
//!
//! Chunks are embedded with a short header (path, enclosing symbols,
//! language, leading imports) so that conceptual queries match code whose
//! body alone says little about where it lives.

use crate::document::{Chunk, DocumentMetadata};

/// Maximum number of import lines included in the embedding text.
const MAX_IMPORT_LINES: usize = 5;

/// Document bodies are cut to this many bytes before embedding.
const MAX_DOCUMENT_BODY: usize = 8000;

/// Rough token count: four characters per token.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Text optimized for embedding a chunk (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk, meta: &DocumentMetadata) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 256);

    text.push_str("# ");
    text.push_str(&meta.path.to_string_lossy());
    text.push('\n');

    if !chunk.parents.is_empty() || !chunk.symbols.is_empty() {
        text.push_str("# Scope: ");
        let scope: Vec<&str> = chunk
            .parents
            .iter()
            .chain(chunk.symbols.first())
            .map(String::as_str)
            .collect();
        text.push_str(&scope.join(" > "));
        text.push('\n');
    }

    if let Some(lang) = meta.language {
        text.push_str("# Language: ");
        text.push_str(lang.id());
        text.push('\n');
    }

    for import in meta.imports.iter().take(MAX_IMPORT_LINES) {
        text.push_str(import);
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// Text for the whole-document embedding: header, doc comment, declared
/// names, then the (truncated) body.
#[must_use]
pub fn document_embedding_text(meta: &DocumentMetadata, content: &str) -> String {
    let mut text = format!("# {}\n", meta.path.to_string_lossy());
    if let Some(lang) = meta.language {
        text.push_str("# Language: ");
        text.push_str(lang.id());
        text.push('\n');
    }
    if let Some(doc) = &meta.doc_comment {
        text.push_str(doc);
        text.push('\n');
    }
    if !meta.classes.is_empty() {
        text.push_str("# Classes: ");
        text.push_str(&meta.classes.join(", "));
        text.push('\n');
    }
    if !meta.functions.is_empty() {
        text.push_str("# Functions: ");
        text.push_str(&meta.functions.join(", "));
        text.push('\n');
    }
    text.push_str(truncate_at_char_boundary(content, MAX_DOCUMENT_BODY));
    text
}

/// Short header for display in retrieved results.
#[must_use]
pub fn chunk_display_header(path: &str, chunk: &Chunk) -> String {
    let name = chunk.name().unwrap_or(chunk.kind.as_str());
    format!(
        "{path} :: {name} (lines {}-{})",
        chunk.start_line, chunk.end_line
    )
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
