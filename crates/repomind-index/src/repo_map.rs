//! Directory/file tree of a project annotated with structural metadata.
//!
//! The map mirrors the filesystem under a root path. File nodes carry the
//! language, symbols and imports extracted by the parser, which lets callers
//! resolve import-based dependencies and render a compact text overview.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::config::CONVENTIONAL_IGNORES;
use crate::context::estimate_tokens;
use crate::document::DocumentMetadata;
use crate::error::{IndexError, Result};
use crate::languages::{Lang, detect_language};

#[derive(Debug, Clone, PartialEq)]
pub enum MapNode {
    Directory(DirectoryNode),
    File(FileNode),
}

impl MapNode {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(d) => &d.path,
            Self::File(f) => &f.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryNode {
    pub name: String,
    pub path: PathBuf,
    pub children: BTreeMap<String, MapNode>,
}

impl DirectoryNode {
    fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            children: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub name: String,
    pub path: PathBuf,
    pub language: Option<Lang>,
    pub size: u64,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    pub imports: Vec<String>,
    pub symbols: BTreeMap<String, Vec<usize>>,
}

impl FileNode {
    fn apply(&mut self, meta: &DocumentMetadata) {
        self.language = meta.language.or(self.language);
        self.size = meta.size;
        self.classes.clone_from(&meta.classes);
        self.functions.clone_from(&meta.functions);
        self.imports.clone_from(&meta.imports);
        self.symbols.clone_from(&meta.symbols);
    }

    fn symbol_count(&self) -> usize {
        self.classes.len() + self.functions.len()
    }
}

/// Import resolution capability; language-specific by nature.
pub trait ImportResolver: Send + Sync {
    /// Files that an import statement may refer to.
    fn search_files_by_import(&self, import: &str) -> Vec<PathBuf>;

    /// Files related to `path` (imported by it or importing it).
    fn related_files(&self, path: &Path) -> Vec<PathBuf>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepoMap {
    root: DirectoryNode,
}

impl RepoMap {
    /// Empty map rooted at `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            root: DirectoryNode::new(name, root.to_path_buf()),
        }
    }

    /// Walk the filesystem under `root`. Conventionally ignored directories
    /// are skipped and symlinks are not followed.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not a readable directory.
    pub fn build(root: &Path) -> Result<Self> {
        if !std::fs::metadata(root)?.is_dir() {
            return Err(IndexError::Other(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let mut map = Self::new(root);
        let walker = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(|e| {
                !(e.depth() > 0
                    && e.file_type().is_some_and(|ft| ft.is_dir())
                    && CONVENTIONAL_IGNORES.contains(&e.file_name().to_string_lossy().as_ref()))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("repo map walk error: {e}");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Some(ft) = entry.file_type() else {
                continue;
            };
            if ft.is_dir() {
                if let Some(rel) = map.relative(entry.path())
                    && map.get_or_create_directory(&rel).is_none()
                {
                    tracing::debug!(path = %entry.path().display(), "directory shadowed by a file");
                }
            } else if ft.is_file() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                map.insert_file(entry.path(), size);
            }
        }
        Ok(map)
    }

    /// Build from already parsed documents. Relative paths are taken as
    /// relative to `root`; paths outside `root` are skipped.
    #[must_use]
    pub fn from_documents<'a, I>(documents: I, root: &Path) -> Self
    where
        I: IntoIterator<Item = &'a DocumentMetadata>,
    {
        let mut map = Self::new(root);
        for meta in documents {
            if map.insert_file(&meta.path, meta.size) {
                if let Some(node) = map.find_file_mut(&meta.path) {
                    node.apply(meta);
                }
            } else {
                tracing::debug!(path = %meta.path.display(), "outside map root, skipped");
            }
        }
        map
    }

    #[must_use]
    pub fn root(&self) -> &DirectoryNode {
        &self.root
    }

    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root.path
    }

    /// Path relative to the root with `.` removed, or `None` if it escapes the root.
    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let rel = if path.is_absolute() || path.starts_with(&self.root.path) {
            path.strip_prefix(&self.root.path).ok()?
        } else {
            path
        };
        let mut out = PathBuf::new();
        for c in rel.components() {
            match c {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(out)
    }

    /// Directory node for `rel`, creating missing segments on the way.
    /// `None` if a file already occupies one of the segments.
    pub fn get_or_create_directory(&mut self, rel: &Path) -> Option<&mut DirectoryNode> {
        let mut node = &mut self.root;
        for part in rel.components() {
            let Component::Normal(part) = part else {
                continue;
            };
            let name = part.to_string_lossy().into_owned();
            let path = node.path.join(&name);
            let entry = node
                .children
                .entry(name.clone())
                .or_insert_with(|| MapNode::Directory(DirectoryNode::new(name, path)));
            match entry {
                MapNode::Directory(dir) => node = dir,
                MapNode::File(_) => return None,
            }
        }
        Some(node)
    }

    /// Attach a file node. Returns `false` if the path lies outside the root
    /// or a directory already has that name.
    pub fn insert_file(&mut self, path: &Path, size: u64) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        let Some(name) = rel.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return false;
        };
        let parent = rel.parent().unwrap_or(Path::new(""));
        let Some(dir) = self.get_or_create_directory(parent) else {
            return false;
        };
        if let Some(MapNode::Directory(existing)) = dir.children.get(&name) {
            tracing::warn!(
                path = %existing.path.display(),
                "directory already in map, file with the same name ignored"
            );
            return false;
        }
        let file = FileNode {
            language: detect_language(Path::new(&name)),
            path: dir.path.join(&name),
            name: name.clone(),
            size,
            classes: Vec::new(),
            functions: Vec::new(),
            imports: Vec::new(),
            symbols: BTreeMap::new(),
        };
        dir.children.insert(name, MapNode::File(file));
        true
    }

    /// Overwrite file nodes' structural fields from parsed metadata.
    /// Returns the number of nodes updated.
    pub fn enrich<'a, I>(&mut self, metadata: I) -> usize
    where
        I: IntoIterator<Item = &'a DocumentMetadata>,
    {
        let mut updated = 0;
        for meta in metadata {
            if let Some(node) = self.find_file_mut(&meta.path) {
                node.apply(meta);
                updated += 1;
            }
        }
        updated
    }

    fn walk(&self, path: &Path) -> Option<&MapNode> {
        let rel = self.relative(path)?;
        let mut parts = rel.components().peekable();
        let mut dir = &self.root;
        while let Some(Component::Normal(part)) = parts.next() {
            let child = dir.children.get(part.to_string_lossy().as_ref())?;
            if parts.peek().is_none() {
                return Some(child);
            }
            let MapNode::Directory(next) = child else {
                return None;
            };
            dir = next;
        }
        None
    }

    #[must_use]
    pub fn find_file(&self, path: &Path) -> Option<&FileNode> {
        match self.walk(path)? {
            MapNode::File(f) => Some(f),
            MapNode::Directory(_) => None,
        }
    }

    fn find_file_mut(&mut self, path: &Path) -> Option<&mut FileNode> {
        let rel = self.relative(path)?;
        let name = rel.file_name()?.to_string_lossy().into_owned();
        let mut dir = &mut self.root;
        if let Some(parent) = rel.parent() {
            for part in parent.components() {
                let Component::Normal(part) = part else {
                    continue;
                };
                match dir.children.get_mut(part.to_string_lossy().as_ref())? {
                    MapNode::Directory(next) => dir = next,
                    MapNode::File(_) => return None,
                }
            }
        }
        match dir.children.get_mut(&name)? {
            MapNode::File(f) => Some(f),
            MapNode::Directory(_) => None,
        }
    }

    /// Directory node at `path`; the root itself for an empty relative path.
    #[must_use]
    pub fn find_directory(&self, path: &Path) -> Option<&DirectoryNode> {
        let rel = self.relative(path)?;
        if rel.as_os_str().is_empty() {
            return Some(&self.root);
        }
        match self.walk(path)? {
            MapNode::Directory(d) => Some(d),
            MapNode::File(_) => None,
        }
    }

    /// All file nodes, ordered by path.
    #[must_use]
    pub fn files(&self) -> Vec<&FileNode> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(dir) = stack.pop() {
            for child in dir.children.values() {
                match child {
                    MapNode::File(f) => out.push(f),
                    MapNode::Directory(d) => stack.push(d),
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Files the imports of `path` resolve to. Empty if the file is unknown.
    #[must_use]
    pub fn get_file_dependencies(&self, path: &Path, resolver: &dyn ImportResolver) -> Vec<PathBuf> {
        let Some(file) = self.find_file(path) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for import in &file.imports {
            for candidate in resolver.search_files_by_import(import) {
                if candidate != file.path && seen.insert(candidate.clone()) {
                    out.push(candidate);
                }
            }
        }
        out
    }

    #[must_use]
    pub fn get_related_files(&self, path: &Path, resolver: &dyn ImportResolver) -> Vec<PathBuf> {
        let Some(file) = self.find_file(path) else {
            return Vec::new();
        };
        resolver
            .related_files(&file.path)
            .into_iter()
            .filter(|p| *p != file.path)
            .collect()
    }

    /// Compact text overview within `token_budget`. Files are ordered by
    /// symbol count (more symbols first), then path.
    #[must_use]
    pub fn render(&self, token_budget: usize) -> String {
        let mut entries: Vec<(String, &FileNode)> = self
            .files()
            .into_iter()
            .filter(|f| f.symbol_count() > 0)
            .map(|f| {
                let rel = f
                    .path
                    .strip_prefix(&self.root.path)
                    .unwrap_or(&f.path)
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, f)
            })
            .collect();
        entries.sort_by(|a, b| {
            b.1.symbol_count()
                .cmp(&a.1.symbol_count())
                .then_with(|| a.0.cmp(&b.0))
        });

        let header = "<repo_map>\n";
        let footer = "</repo_map>";
        let mut map = String::from(header);
        let mut used = estimate_tokens(header) + estimate_tokens(footer);

        for (idx, (path, file)) in entries.iter().enumerate() {
            let symbols: Vec<String> = file
                .classes
                .iter()
                .map(|c| format!("class:{c}"))
                .chain(file.functions.iter().map(|f| format!("fn:{f}")))
                .collect();
            let line = format!("  {path} :: {}\n", symbols.join(", "));
            let cost = estimate_tokens(&line);
            if used + cost > token_budget {
                let remaining = entries.len() - idx;
                let _ = writeln!(map, "  ... and {remaining} more files");
                break;
            }
            map.push_str(&line);
            used += cost;
        }

        map.push_str(footer);
        map
    }
}

/// Import resolution by module-path heuristics over the files of a map.
///
/// Each file is indexed under every component-suffix of its module path
/// (`src/pkg/util.py` → `src/pkg/util`, `pkg/util`, `util`), with package
/// entry files (`__init__.py`, `mod.rs`, `index.js`) and Go files also
/// indexed under their directory.
#[derive(Debug, Clone, Default)]
pub struct PathImportResolver {
    modules: HashMap<String, BTreeSet<PathBuf>>,
    imports_of: HashMap<PathBuf, BTreeSet<PathBuf>>,
    importers: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

const PACKAGE_ENTRY_STEMS: &[&str] = &["__init__", "mod", "index"];

const EXTERNAL_RUST_ROOTS: &[&str] = &["std", "core", "alloc"];

impl PathImportResolver {
    #[must_use]
    pub fn from_map(map: &RepoMap) -> Self {
        let root = map.root_path();
        let files = map.files();
        let mut resolver = Self::default();

        for file in &files {
            let Ok(rel) = file.path.strip_prefix(root) else {
                continue;
            };
            let stem_path = rel.with_extension("");
            let module = path_key(&stem_path);
            resolver.index_module(&module, &file.path);

            let stem = stem_path.file_name().map(|s| s.to_string_lossy());
            let is_package_entry = stem.is_some_and(|s| PACKAGE_ENTRY_STEMS.contains(&s.as_ref()));
            if (is_package_entry || file.language == Some(Lang::Go))
                && let Some(parent) = rel.parent()
            {
                resolver.index_module(&path_key(parent), &file.path);
            }
        }

        for file in &files {
            for import in &file.imports {
                for target in resolver.search_files_by_import(import) {
                    if target == file.path {
                        continue;
                    }
                    resolver
                        .imports_of
                        .entry(file.path.clone())
                        .or_default()
                        .insert(target.clone());
                    resolver
                        .importers
                        .entry(target)
                        .or_default()
                        .insert(file.path.clone());
                }
            }
        }
        resolver
    }

    fn index_module(&mut self, module: &str, path: &Path) {
        let parts: Vec<&str> = module.split('/').filter(|p| !p.is_empty()).collect();
        for i in 0..parts.len() {
            self.modules
                .entry(parts[i..].join("/"))
                .or_default()
                .insert(path.to_path_buf());
        }
    }

    fn lookup(&self, candidates: &[String]) -> Vec<PathBuf> {
        for candidate in candidates {
            if let Some(files) = self.modules.get(candidate.trim_matches('/')) {
                return files.iter().cloned().collect();
            }
        }
        Vec::new()
    }
}

impl ImportResolver for PathImportResolver {
    fn search_files_by_import(&self, import: &str) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();
        for group in module_candidates(import) {
            found.extend(self.lookup(&group));
        }
        found.into_iter().collect()
    }

    fn related_files(&self, path: &Path) -> Vec<PathBuf> {
        let mut related: BTreeSet<PathBuf> = BTreeSet::new();
        if let Some(out) = self.imports_of.get(path) {
            related.extend(out.iter().cloned());
        }
        if let Some(inc) = self.importers.get(path) {
            related.extend(inc.iter().cloned());
        }
        related.remove(path);
        related.into_iter().collect()
    }
}

fn path_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Candidate module paths for an import statement. Each inner list is tried
/// in order and the first hit wins; hits from different lists are merged.
fn module_candidates(import: &str) -> Vec<Vec<String>> {
    let import = import.trim();
    if let Some(rest) = import
        .strip_prefix("pub ")
        .unwrap_or(import)
        .strip_prefix("use ")
    {
        return rust_candidates(rest);
    }
    if import.starts_with("extern crate") {
        return Vec::new();
    }
    if let Some(rest) = import.strip_prefix("from ") {
        return python_from_candidates(rest);
    }
    let quoted = quoted_strings(import);
    if !quoted.is_empty() {
        return quoted.iter().map(|q| quoted_candidates(q)).collect();
    }
    if let Some(rest) = import.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .map(|m| vec![m.trim_start_matches('.').replace('.', "/")])
            .collect();
    }
    Vec::new()
}

fn rust_candidates(rest: &str) -> Vec<Vec<String>> {
    let path = rest.trim_end_matches(';').trim();
    let path = path.split('{').next().unwrap_or(path).trim_end_matches("::");
    let path = path.split(" as ").next().unwrap_or(path);
    let mut segs: Vec<&str> = path.split("::").map(str::trim).filter(|s| !s.is_empty()).collect();
    while segs
        .first()
        .is_some_and(|s| matches!(*s, "crate" | "self" | "super"))
    {
        segs.remove(0);
    }
    if segs.is_empty() || segs.first().is_some_and(|s| EXTERNAL_RUST_ROOTS.contains(s)) {
        return Vec::new();
    }
    // longest prefix first: `a::b::Item` may live in `a/b.rs` or `a.rs`
    let group = (1..=segs.len())
        .rev()
        .map(|n| segs[..n].join("/"))
        .collect();
    vec![group]
}

fn python_from_candidates(rest: &str) -> Vec<Vec<String>> {
    let Some((module, names)) = rest.split_once(" import ") else {
        return Vec::new();
    };
    let module = module.trim().trim_start_matches('.').replace('.', "/");
    let names = names.trim().trim_matches(|c| c == '(' || c == ')');
    let mut groups: Vec<Vec<String>> = names
        .split(',')
        .filter_map(|n| n.split_whitespace().next())
        .filter(|n| *n != "*")
        .map(|name| {
            if module.is_empty() {
                vec![name.to_owned()]
            } else {
                vec![format!("{module}/{name}"), module.clone()]
            }
        })
        .collect();
    if groups.is_empty() && !module.is_empty() {
        groups.push(vec![module]);
    }
    groups
}

fn quoted_candidates(spec: &str) -> Vec<String> {
    let trimmed: Vec<&str> = spec
        .split('/')
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();
    let joined = trimmed.join("/");
    let without_ext = path_key(&Path::new(&joined).with_extension(""));
    let mut candidates = Vec::new();
    for full in [without_ext, joined] {
        let parts: Vec<&str> = full.split('/').collect();
        // longest suffix first: `example.com/m/internal/db` may live in `internal/db`
        for i in 0..parts.len() {
            let suffix = parts[i..].join("/");
            if !suffix.is_empty() && !candidates.contains(&suffix) {
                candidates.push(suffix);
            }
        }
    }
    candidates
}

fn quoted_strings(text: &str) -> Vec<String> {
    static QUOTED: std::sync::LazyLock<Option<Regex>> =
        std::sync::LazyLock::new(|| Regex::new(r#"["'`]([^"'`\s]+)["'`]"#).ok());
    QUOTED.as_ref().map_or_else(Vec::new, |re| {
        re.captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .collect()
    })
}
