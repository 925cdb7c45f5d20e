//! Structural symbol extraction over tree-sitter syntax trees.

use std::collections::HashMap;
use std::sync::Arc;

use tree_sitter::{Node, Parser, Tree};

use crate::document::{ChunkKind, Document};
use crate::languages::{KindTable, Lang, NodeKind};

/// Per-language grammar capability.
pub trait GrammarProvider: Send + Sync {
    fn grammar(&self, lang: Lang) -> Option<tree_sitter::Language>;

    fn supports(&self, lang: Lang) -> bool {
        self.grammar(lang).is_some()
    }

    /// Parse `source`. `None` when the language is unsupported or the parse
    /// was aborted.
    fn parse(&self, lang: Lang, source: &str) -> Option<Tree> {
        let grammar = self.grammar(lang)?;
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&grammar) {
            tracing::warn!(lang = lang.id(), "grammar rejected by parser: {e}");
            return None;
        }
        parser.parse(source, None)
    }
}

/// Grammars compiled into this crate via cargo features.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterGrammars;

impl GrammarProvider for TreeSitterGrammars {
    fn grammar(&self, lang: Lang) -> Option<tree_sitter::Language> {
        lang.grammar()
    }
}

/// One class, function or method found in a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub kind: ChunkKind,
    pub name: String,
    /// First row of the definition including decorators (0-based).
    pub start_row: usize,
    pub end_row: usize,
    /// Row of the declaring node itself (0-based).
    pub decl_row: usize,
    /// Enclosing class-like names, outermost first.
    pub parents: Vec<String>,
}

/// Everything the parser extracts from one file.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    pub imports: Vec<String>,
    /// Definitions in source order.
    pub definitions: Vec<Definition>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Enclosing {
    Module,
    Class,
    Function,
}

pub struct SymbolParser {
    provider: Arc<dyn GrammarProvider>,
    tables: HashMap<Lang, KindTable>,
}

impl std::fmt::Debug for SymbolParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolParser")
            .field("languages", &self.tables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for SymbolParser {
    fn default() -> Self {
        Self::new(Arc::new(TreeSitterGrammars))
    }
}

impl SymbolParser {
    #[must_use]
    pub fn new(provider: Arc<dyn GrammarProvider>) -> Self {
        let tables = Lang::ALL
            .into_iter()
            .filter_map(|lang| {
                let grammar = provider.grammar(lang)?;
                Some((lang, KindTable::new(lang, &grammar)))
            })
            .collect();
        Self { provider, tables }
    }

    #[must_use]
    pub fn supports(&self, lang: Lang) -> bool {
        self.tables.contains_key(&lang) && self.provider.supports(lang)
    }

    /// Fill `doc.metadata` with imports, classes, functions, the symbol table
    /// and the module doc comment. Unsupported languages are left untouched
    /// apart from the doc comment.
    pub fn parse(&self, doc: &mut Document) -> Option<Structure> {
        let lang = doc.language()?;
        doc.metadata.doc_comment = module_doc_comment(lang, &doc.content);

        let structure = self.analyze(lang, &doc.content)?;
        let meta = &mut doc.metadata;
        meta.imports.clone_from(&structure.imports);
        meta.classes.clear();
        meta.functions.clear();
        meta.symbols.clear();
        for def in &structure.definitions {
            let bucket = match def.kind {
                ChunkKind::Class => &mut meta.classes,
                ChunkKind::Function | ChunkKind::Method => &mut meta.functions,
                ChunkKind::Module => continue,
            };
            if !bucket.contains(&def.name) {
                bucket.push(def.name.clone());
            }
            meta.symbols
                .entry(def.name.clone())
                .or_default()
                .push(def.decl_row + 1);
        }
        Some(structure)
    }

    /// Extract imports and definitions without touching a document.
    #[must_use]
    pub fn analyze(&self, lang: Lang, source: &str) -> Option<Structure> {
        let table = self.tables.get(&lang)?;
        let tree = self.provider.parse(lang, source)?;
        if tree.root_node().has_error() {
            tracing::debug!(lang = lang.id(), "syntax errors present, extracting what parsed");
        }
        Some(collect(&tree, source, lang, table))
    }
}

struct Frame<'t> {
    node: Node<'t>,
    parents: Arc<Vec<String>>,
    enclosing: Enclosing,
}

fn collect(tree: &Tree, source: &str, lang: Lang, table: &KindTable) -> Structure {
    let mut out = Structure::default();
    let mut stack = vec![Frame {
        node: tree.root_node(),
        parents: Arc::new(Vec::new()),
        enclosing: Enclosing::Module,
    }];

    while let Some(frame) = stack.pop() {
        let node = frame.node;
        let mut parents = frame.parents;
        let mut enclosing = frame.enclosing;

        match table.classify(&node) {
            NodeKind::Import => {
                out.imports.push(node_text(&node, source).trim().to_owned());
                continue;
            }
            kind @ (NodeKind::Class | NodeKind::Function | NodeKind::Method) => {
                let chunk_kind = match kind {
                    NodeKind::Class => ChunkKind::Class,
                    NodeKind::Function if enclosing == Enclosing::Class => ChunkKind::Method,
                    NodeKind::Function => ChunkKind::Function,
                    _ => ChunkKind::Method,
                };
                let name = declared_name(&node, source);
                if let Some(name) = &name {
                    let mut def_parents = parents.as_ref().clone();
                    if lang == Lang::Go
                        && chunk_kind == ChunkKind::Method
                        && let Some(receiver) = go_receiver_type(&node, source)
                    {
                        def_parents.push(receiver);
                    }
                    let decorated = node
                        .parent()
                        .filter(|p| table.classify(p) == NodeKind::Decorated);
                    out.definitions.push(Definition {
                        kind: chunk_kind,
                        name: name.clone(),
                        start_row: decorated.unwrap_or(node).start_position().row,
                        end_row: node.end_position().row,
                        decl_row: node.start_position().row,
                        parents: def_parents,
                    });
                }
                if chunk_kind == ChunkKind::Class {
                    enclosing = Enclosing::Class;
                    if let Some(name) = name {
                        let mut next = parents.as_ref().clone();
                        next.push(name);
                        parents = Arc::new(next);
                    }
                } else {
                    enclosing = Enclosing::Function;
                }
            }
            NodeKind::Decorated | NodeKind::Other => {}
        }

        let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        for i in (0..count).rev() {
            if let Some(child) = node.named_child(i) {
                stack.push(Frame {
                    node: child,
                    parents: Arc::clone(&parents),
                    enclosing,
                });
            }
        }
    }

    out
}

fn node_text<'s>(node: &Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// `name` field, then `type` (Rust `impl_item`), then the first identifier-like child.
fn declared_name(node: &Node<'_>, source: &str) -> Option<String> {
    let named = node
        .child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| {
            let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
            (0..count)
                .filter_map(|i| node.named_child(i))
                .find(|c| c.kind().ends_with("identifier"))
        })?;
    let text = node_text(&named, source).trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn go_receiver_type(node: &Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let mut stack = vec![receiver];
    while let Some(n) = stack.pop() {
        if n.kind() == "type_identifier" {
            return Some(node_text(&n, source).to_owned());
        }
        let count = u32::try_from(n.named_child_count()).unwrap_or(u32::MAX);
        for i in (0..count).rev() {
            if let Some(c) = n.named_child(i) {
                stack.push(c);
            }
        }
    }
    None
}

/// Module-level documentation: Python docstring, Rust `//!` lines, or the
/// leading comment block for other languages.
#[must_use]
pub fn module_doc_comment(lang: Lang, source: &str) -> Option<String> {
    let doc = match lang {
        Lang::Python => python_docstring(source),
        Lang::Rust => line_comment_block(source, &["//!"]),
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx | Lang::Go => {
            block_comment(source).or_else(|| line_comment_block(source, &["//"]))
        }
        Lang::Bash | Lang::Toml => line_comment_block(source, &["#"]),
        Lang::Json | Lang::Markdown => None,
    }?;
    let doc = doc.trim().to_owned();
    (!doc.is_empty()).then_some(doc)
}

fn significant_lines(source: &str) -> impl Iterator<Item = &str> {
    source
        .lines()
        .map(str::trim)
        .skip_while(|l| l.is_empty() || l.starts_with("#!") || l.starts_with("# -*-"))
}

fn python_docstring(source: &str) -> Option<String> {
    let rest: String = significant_lines(source).collect::<Vec<_>>().join("\n");
    let rest = rest.trim_start_matches(['r', 'R', 'u', 'U']);
    let quote = ["\"\"\"", "'''"].into_iter().find(|q| rest.starts_with(q))?;
    let body = &rest[quote.len()..];
    let end = body.find(quote)?;
    Some(body[..end].to_owned())
}

fn line_comment_block(source: &str, prefixes: &[&str]) -> Option<String> {
    let lines: Vec<&str> = significant_lines(source)
        .map_while(|l| {
            prefixes
                .iter()
                .find_map(|p| l.strip_prefix(p))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn block_comment(source: &str) -> Option<String> {
    let trimmed = source.trim_start();
    let body = trimmed.strip_prefix("/*")?;
    let end = body.find("*/")?;
    let text = body[..end]
        .lines()
        .map(|l| {
            let l = l.trim();
            let l = l.strip_prefix('*').unwrap_or(l);
            l.strip_prefix(' ').unwrap_or(l)
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, src: &str) -> (Document, Option<Structure>) {
        let mut doc = Document::new(path, src);
        let structure = SymbolParser::default().parse(&mut doc);
        (doc, structure)
    }

    #[test]
    fn unsupported_language_passes_through() {
        let (doc, structure) = parse("notes.txt", "class Foo:\n    pass\n");
        assert!(structure.is_none());
        assert!(doc.metadata.classes.is_empty());
        assert!(doc.metadata.symbols.is_empty());
    }

    #[test]
    fn provider_without_grammars_supports_nothing() {
        struct Empty;
        impl GrammarProvider for Empty {
            fn grammar(&self, _lang: Lang) -> Option<tree_sitter::Language> {
                None
            }
        }
        let parser = SymbolParser::new(Arc::new(Empty));
        assert!(!parser.supports(Lang::Python));
        let mut doc = Document::new("a.py", "def foo():\n    pass\n");
        assert!(parser.parse(&mut doc).is_none());
        assert!(doc.metadata.functions.is_empty());
    }

    #[test]
    fn doc_comment_rust_inner_lines() {
        let src = "//! Crate docs.\n//! Second line.\n\nfn main() {}\n";
        assert_eq!(
            module_doc_comment(Lang::Rust, src).as_deref(),
            Some("Crate docs.\nSecond line.")
        );
    }

    #[test]
    fn doc_comment_python_docstring() {
        let src = "#!/usr/bin/env python\n\"\"\"Tools for things.\n\nMore.\n\"\"\"\nimport os\n";
        assert_eq!(
            module_doc_comment(Lang::Python, src).as_deref(),
            Some("Tools for things.\n\nMore.")
        );
        assert!(module_doc_comment(Lang::Python, "import os\n").is_none());
    }

    #[test]
    fn doc_comment_go_and_js() {
        assert_eq!(
            module_doc_comment(Lang::Go, "// Package x does y.\npackage x\n").as_deref(),
            Some("Package x does y.")
        );
        assert_eq!(
            module_doc_comment(Lang::JavaScript, "/**\n * Utilities.\n */\nexport {}\n")
                .as_deref(),
            Some("Utilities.")
        );
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_and_method() {
        let src = "class Bar:\n    def baz(self):\n        return 1\n";
        let (doc, structure) = parse("b.py", src);
        let defs = structure.unwrap().definitions;
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].kind, ChunkKind::Class);
        assert_eq!(defs[0].name, "Bar");
        assert!(defs[0].parents.is_empty());
        assert_eq!(defs[1].kind, ChunkKind::Method);
        assert_eq!(defs[1].name, "baz");
        assert_eq!(defs[1].parents, vec!["Bar"]);
        assert_eq!(doc.metadata.classes, vec!["Bar"]);
        assert_eq!(doc.metadata.functions, vec!["baz"]);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_imports_and_symbol_table() {
        let src = "import os\nfrom a import b\n\ndef f():\n    pass\n\ndef f():\n    pass\n";
        let (doc, _) = parse("m.py", src);
        assert_eq!(doc.metadata.imports, vec!["import os", "from a import b"]);
        assert_eq!(doc.metadata.functions, vec!["f"]);
        assert_eq!(doc.metadata.symbols.get("f"), Some(&vec![4, 7]));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_nested_function_is_not_method() {
        let src = "class A:\n    def m(self):\n        def inner():\n            pass\n";
        let (_, structure) = parse("n.py", src);
        let defs = structure.unwrap().definitions;
        let inner = defs.iter().find(|d| d.name == "inner").unwrap();
        assert_eq!(inner.kind, ChunkKind::Function);
        assert_eq!(inner.parents, vec!["A"]);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_decorator_extends_start() {
        let src = "@cache\ndef slow():\n    pass\n";
        let (doc, structure) = parse("d.py", src);
        let def = &structure.unwrap().definitions[0];
        assert_eq!(def.start_row, 0);
        assert_eq!(def.decl_row, 1);
        assert_eq!(doc.metadata.symbols.get("slow"), Some(&vec![2]));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_impl_methods() {
        let src = "use std::fmt;\n\nstruct Foo;\n\nimpl Foo {\n    fn bar(&self) {}\n}\n\nfn free() {}\n";
        let (doc, structure) = parse("lib.rs", src);
        let defs = structure.unwrap().definitions;
        let bar = defs.iter().find(|d| d.name == "bar").unwrap();
        assert_eq!(bar.kind, ChunkKind::Method);
        assert_eq!(bar.parents, vec!["Foo"]);
        let free = defs.iter().find(|d| d.name == "free").unwrap();
        assert_eq!(free.kind, ChunkKind::Function);
        assert_eq!(doc.metadata.imports, vec!["use std::fmt;"]);
        assert_eq!(doc.metadata.symbols.get("Foo"), Some(&vec![3, 5]));
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn js_class_methods() {
        let src = "import x from './x';\nclass Svc {\n  run() { return 1; }\n}\nfunction helper() {}\n";
        let (doc, structure) = parse("svc.js", src);
        let defs = structure.unwrap().definitions;
        let run = defs.iter().find(|d| d.name == "run").unwrap();
        assert_eq!(run.kind, ChunkKind::Method);
        assert_eq!(run.parents, vec!["Svc"]);
        assert_eq!(doc.metadata.imports, vec!["import x from './x';"]);
        assert_eq!(doc.metadata.functions, vec!["run", "helper"]);
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_method_receiver_is_parent() {
        let src = "package p\n\nimport \"fmt\"\n\ntype Server struct{}\n\nfunc (s *Server) Start() {}\n";
        let (doc, structure) = parse("s.go", src);
        let defs = structure.unwrap().definitions;
        let start = defs.iter().find(|d| d.name == "Start").unwrap();
        assert_eq!(start.kind, ChunkKind::Method);
        assert_eq!(start.parents, vec!["Server"]);
        assert_eq!(doc.metadata.classes, vec!["Server"]);
        assert_eq!(doc.metadata.imports, vec!["import \"fmt\""]);
    }
}
