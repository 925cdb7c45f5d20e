//! Language detection, tree-sitter grammar registry, and syntax node kinds.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source language tag attached to every document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
}

/// Structural role of a syntax node, resolved once per grammar symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Import,
    Class,
    Function,
    Method,
    /// Wrapper that carries decorators/attributes for the definition inside it.
    Decorated,
    Other,
}

impl Lang {
    pub const ALL: [Lang; 10] = [
        Lang::Rust,
        Lang::Python,
        Lang::JavaScript,
        Lang::TypeScript,
        Lang::Tsx,
        Lang::Go,
        Lang::Bash,
        Lang::Toml,
        Lang::Json,
        Lang::Markdown,
    ];

    /// Identifier used in stored metadata and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the language has no
    /// structural grammar or the corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Grammar node kinds that carry structural meaning for this language.
    #[must_use]
    pub fn node_kinds(self) -> &'static [(&'static str, NodeKind)] {
        use NodeKind::{Class, Decorated, Function, Import, Method};
        match self {
            Self::Python => &[
                ("import_statement", Import),
                ("import_from_statement", Import),
                ("future_import_statement", Import),
                ("class_definition", Class),
                ("function_definition", Function),
                ("decorated_definition", Decorated),
            ],
            Self::Rust => &[
                ("use_declaration", Import),
                ("extern_crate_declaration", Import),
                ("struct_item", Class),
                ("enum_item", Class),
                ("union_item", Class),
                ("trait_item", Class),
                ("impl_item", Class),
                ("function_item", Function),
                ("function_signature_item", Function),
            ],
            Self::JavaScript => &[
                ("import_statement", Import),
                ("class_declaration", Class),
                ("class", Class),
                ("function_declaration", Function),
                ("generator_function_declaration", Function),
                ("method_definition", Method),
            ],
            Self::TypeScript | Self::Tsx => &[
                ("import_statement", Import),
                ("class_declaration", Class),
                ("class", Class),
                ("abstract_class_declaration", Class),
                ("interface_declaration", Class),
                ("function_declaration", Function),
                ("generator_function_declaration", Function),
                ("function_signature", Function),
                ("method_definition", Method),
                ("method_signature", Method),
                ("abstract_method_signature", Method),
            ],
            Self::Go => &[
                ("import_declaration", Import),
                ("type_spec", Class),
                ("function_declaration", Function),
                ("method_declaration", Method),
            ],
            Self::Bash | Self::Toml | Self::Json | Self::Markdown => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Lang {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|l| l.id() == s).ok_or(())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}

/// Check if a file has a structural grammar available.
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}

/// Grammar symbol id → [`NodeKind`], built once per grammar.
#[derive(Debug, Clone, Default)]
pub(crate) struct KindTable {
    by_id: HashMap<u16, NodeKind>,
}

impl KindTable {
    pub(crate) fn new(lang: Lang, grammar: &tree_sitter::Language) -> Self {
        let wanted: HashMap<&str, NodeKind> = lang.node_kinds().iter().copied().collect();
        let mut by_id = HashMap::new();
        let count = u16::try_from(grammar.node_kind_count()).unwrap_or(u16::MAX);
        for id in 0..count {
            if !grammar.node_kind_is_named(id) {
                continue;
            }
            if let Some(kind) = grammar
                .node_kind_for_id(id)
                .and_then(|name| wanted.get(name))
            {
                by_id.insert(id, *kind);
            }
        }
        Self { by_id }
    }

    pub(crate) fn classify(&self, node: &tree_sitter::Node<'_>) -> NodeKind {
        if !node.is_named() {
            return NodeKind::Other;
        }
        self.by_id
            .get(&node.kind_id())
            .copied()
            .unwrap_or(NodeKind::Other)
    }
}
