//! Syntax-aware chunking with a size-bounded secondary split.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::config::ChunkerConfig;
use crate::document::{Chunk, ChunkKind, Document, content_hash};
use crate::parser::{Definition, Structure, SymbolParser};

pub struct Chunker {
    config: ChunkerConfig,
    parser: Arc<SymbolParser>,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig, parser: Arc<SymbolParser>) -> Self {
        Self { config, parser }
    }

    /// Chunk a document, parsing it first if its language is supported.
    #[must_use]
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let structure = doc
            .language()
            .and_then(|lang| self.parser.analyze(lang, &doc.content));
        self.chunk_with(doc, structure.as_ref())
    }

    /// Chunk a document using an already extracted structure.
    #[must_use]
    pub fn chunk_with(&self, doc: &Document, structure: Option<&Structure>) -> Vec<Chunk> {
        let defs = structure.map_or(&[][..], |s| s.definitions.as_slice());
        let mut chunks = syntax_chunks(&doc.content, defs);
        if chunks.is_empty() {
            chunks.push(module_chunk(&doc.content));
        }
        chunks
            .into_iter()
            .flat_map(|c| {
                split_oversized(c, self.config.max_chunk_size, self.config.min_fragment_size)
            })
            .collect()
    }
}

/// One chunk per contiguous run of lines owned by the same definition, where
/// a line is owned by the innermost definition covering it. Blank runs are
/// dropped. Results never overlap and stay within the document's lines.
#[must_use]
pub fn syntax_chunks(content: &str, definitions: &[Definition]) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || definitions.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<&Definition> = definitions.iter().collect();
    order.sort_by_key(|d| (d.start_row, Reverse(d.end_row)));

    let mut owner: Vec<Option<usize>> = vec![None; lines.len()];
    for (idx, def) in order.iter().enumerate() {
        if def.start_row >= lines.len() {
            continue;
        }
        let end = def.end_row.min(lines.len() - 1);
        for slot in &mut owner[def.start_row..=end] {
            *slot = Some(idx);
        }
    }

    let mut chunks = Vec::new();
    let mut row = 0;
    while row < lines.len() {
        let Some(idx) = owner[row] else {
            row += 1;
            continue;
        };
        let start = row;
        while row < lines.len() && owner[row] == Some(idx) {
            row += 1;
        }
        let mut end = row;
        while end > start && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        if end == start {
            continue;
        }
        let def = order[idx];
        let text = lines[start..end].join("\n");
        chunks.push(Chunk {
            content_hash: content_hash(&text),
            content: text,
            start_line: start + 1,
            end_line: end,
            kind: def.kind,
            symbols: vec![def.name.clone()],
            parents: def.parents.clone(),
        });
    }
    chunks
}

fn module_chunk(content: &str) -> Chunk {
    let lines = content.lines().count();
    Chunk {
        content_hash: content_hash(content),
        content: content.to_owned(),
        start_line: 1,
        end_line: lines.max(1),
        kind: ChunkKind::Module,
        symbols: Vec::new(),
        parents: Vec::new(),
    }
}

/// Split a chunk longer than `max` bytes on blank-line paragraphs, falling
/// back to single lines for paragraphs that are themselves too long. Every
/// fragment keeps the chunk's kind, symbols and parents.
fn split_oversized(chunk: Chunk, max: usize, min: usize) -> Vec<Chunk> {
    if max == 0 || chunk.content.len() <= max {
        return vec![chunk];
    }
    let lines: Vec<&str> = chunk.content.lines().collect();
    let size = |s: usize, e: usize| -> usize {
        lines[s..e].iter().map(|l| l.len() + 1).sum::<usize>().saturating_sub(1)
    };

    let mut units: Vec<(usize, usize)> = Vec::new();
    let mut para_start = 0;
    for i in 0..lines.len() {
        let boundary = i + 1 == lines.len()
            || (lines[i].trim().is_empty() && !lines[i + 1].trim().is_empty());
        if boundary {
            if size(para_start, i + 1) > max {
                units.extend((para_start..=i).map(|l| (l, l + 1)));
            } else {
                units.push((para_start, i + 1));
            }
            para_start = i + 1;
        }
    }

    // Greedy packing of units into groups no larger than `max`.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for (i, &(_, ue)) in units.iter().enumerate() {
        match groups.last_mut() {
            Some((a, b)) if size(units[*a].0, ue) <= max => *b = i + 1,
            _ => groups.push((i, i + 1)),
        }
    }
    let span = |(a, b): (usize, usize)| (units[a].0, units[b - 1].1);

    // A small trailing group takes whole units back from the one before it,
    // as long as it stays within `max`.
    if let [.., prev, last] = groups.as_mut_slice() {
        while prev.1 - prev.0 > 1 {
            let (ls, le) = span(*last);
            let moved = units[prev.1 - 1].0;
            if size(ls, le) >= min || size(moved, le) > max {
                break;
            }
            prev.1 -= 1;
            last.0 -= 1;
        }
    }

    groups
        .into_iter()
        .map(span)
        .filter_map(|(s, mut e)| {
            while e > s && lines[e - 1].trim().is_empty() {
                e -= 1;
            }
            if e == s {
                return None;
            }
            let text = lines[s..e].join("\n");
            Some(Chunk {
                content_hash: content_hash(&text),
                content: text,
                start_line: chunk.start_line + s,
                end_line: chunk.start_line + e - 1,
                kind: chunk.kind,
                symbols: chunk.symbols.clone(),
                parents: chunk.parents.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn def(kind: ChunkKind, name: &str, start: usize, end: usize, parents: &[&str]) -> Definition {
        Definition {
            kind,
            name: name.into(),
            start_row: start,
            end_row: end,
            decl_row: start,
            parents: parents.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    fn chunker(max: usize) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                max_chunk_size: max,
                min_fragment_size: 0,
            },
            Arc::new(SymbolParser::default()),
        )
    }

    #[test]
    fn no_definitions_yields_single_module_chunk() {
        let doc = Document::new("notes.txt", "alpha\nbeta\ngamma\n");
        let chunks = chunker(0).chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Module);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert_eq!(chunks[0].content, doc.content);
    }

    #[test]
    fn empty_document_still_has_module_chunk() {
        let doc = Document::new("empty.py", "");
        let chunks = chunker(0).chunk(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    }

    #[test]
    fn nested_definition_splits_parent() {
        let content = "class A:\n    x = 1\n    def m(self):\n        pass\n    y = 2\n";
        let defs = vec![
            def(ChunkKind::Class, "A", 0, 4, &[]),
            def(ChunkKind::Method, "m", 2, 3, &["A"]),
        ];
        let chunks = syntax_chunks(content, &defs);
        let spans: Vec<_> = chunks
            .iter()
            .map(|c| (c.name().unwrap(), c.start_line, c.end_line))
            .collect();
        assert_eq!(spans, vec![("A", 1, 2), ("m", 3, 4), ("A", 5, 5)]);
        assert_eq!(chunks[1].parents, vec!["A"]);
    }

    #[test]
    fn blank_runs_are_dropped() {
        let content = "class A:\n    def a(self):\n        pass\n\n    def b(self):\n        pass\n";
        let defs = vec![
            def(ChunkKind::Class, "A", 0, 5, &[]),
            def(ChunkKind::Method, "a", 1, 2, &["A"]),
            def(ChunkKind::Method, "b", 4, 5, &["A"]),
        ];
        let names: Vec<_> = syntax_chunks(content, &defs)
            .iter()
            .map(|c| c.name().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["A", "a", "b"]);
    }

    #[test]
    fn oversized_chunk_splits_on_paragraphs_and_keeps_metadata() {
        let content = "def big():\n    a = 1\n    b = 2\n\n    c = 3\n    d = 4\n";
        let defs = vec![def(ChunkKind::Function, "big", 0, 5, &["Outer"])];
        let chunk = syntax_chunks(content, &defs).remove(0);
        let parts = split_oversized(chunk, 40, 0);
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].start_line, parts[0].end_line), (1, 3));
        assert_eq!((parts[1].start_line, parts[1].end_line), (5, 6));
        for p in &parts {
            assert_eq!(p.kind, ChunkKind::Function);
            assert_eq!(p.symbols, vec!["big"]);
            assert_eq!(p.parents, vec!["Outer"]);
        }
    }

    #[test]
    fn long_paragraph_falls_back_to_lines() {
        let content = "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc\n";
        let chunk = module_chunk(content);
        let parts = split_oversized(chunk, 21, 0);
        let spans: Vec<_> = parts.iter().map(|p| (p.start_line, p.end_line)).collect();
        assert_eq!(spans, vec![(1, 2), (3, 3)]);
    }

    #[test]
    fn small_tail_borrows_lines_from_previous_fragment() {
        let content = "aaaa\nbbbb\ncccc\nd\n";
        let parts = split_oversized(module_chunk(content), 14, 6);
        let spans: Vec<_> = parts.iter().map(|p| (p.start_line, p.end_line)).collect();
        assert_eq!(spans, vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn rebalanced_tail_never_exceeds_max() {
        let content = "aaaaaaaaaa\nbbbbbbbbbb\nc\n";
        let parts = split_oversized(module_chunk(content), 21, 5);
        let spans: Vec<_> = parts.iter().map(|p| (p.start_line, p.end_line)).collect();
        assert_eq!(spans, vec![(1, 1), (2, 3)]);
        for p in &parts {
            assert!(p.content.len() <= 21, "{} bytes", p.content.len());
        }
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_with_method() {
        let doc = Document::new("b.py", "class Bar:\n    def baz(self):\n        return 1\n");
        let chunks = chunker(0).chunk(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].name(), Some("Bar"));
        assert_eq!(chunks[1].kind, ChunkKind::Method);
        assert_eq!(chunks[1].name(), Some("baz"));
        assert_eq!(chunks[1].parents, vec!["Bar"]);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_functions_are_chunked() {
        let doc = Document::new("lib.rs", "fn a() {\n    1;\n}\n\nfn b() {}\n");
        let chunks = chunker(0).chunk(&doc);
        let spans: Vec<_> = chunks
            .iter()
            .map(|c| (c.name().unwrap(), c.start_line, c.end_line))
            .collect();
        assert_eq!(spans, vec![("a", 1, 3), ("b", 5, 5)]);
    }

    fn arb_defs() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..40).prop_flat_map(|lines| {
            let span = (0..lines + 5, 0usize..20).prop_map(|(s, len)| (s, s + len));
            (Just(lines), prop::collection::vec(span, 0..12))
        })
    }

    proptest! {
        #[test]
        fn syntax_chunks_never_overlap((line_count, spans) in arb_defs()) {
            let content: String = (0..line_count).map(|i| format!("line {i}\n")).collect();
            let defs: Vec<Definition> = spans
                .iter()
                .enumerate()
                .map(|(i, &(s, e))| def(ChunkKind::Function, &format!("f{i}"), s, e, &[]))
                .collect();
            let chunks = syntax_chunks(&content, &defs);
            for c in &chunks {
                prop_assert!(c.start_line >= 1);
                prop_assert!(c.start_line <= c.end_line);
                prop_assert!(c.end_line <= line_count);
            }
            for (i, a) in chunks.iter().enumerate() {
                for b in &chunks[i + 1..] {
                    prop_assert!(a.end_line < b.start_line || b.end_line < a.start_line);
                }
            }
        }

        #[test]
        fn split_fragments_respect_max_size(
            lines in prop::collection::vec("[a-z]{0,12}", 1..30),
            max in 13usize..80,
            min in 0usize..12,
        ) {
            let content = lines.join("\n");
            let parts = split_oversized(module_chunk(&content), max, min);
            prop_assert!(!parts.is_empty() || content.trim().is_empty());
            for p in &parts {
                prop_assert!(p.content.len() <= max, "{} > {max}", p.content.len());
            }
        }
    }
}
