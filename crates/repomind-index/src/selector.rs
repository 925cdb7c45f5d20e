//! Depth-first file selection with pruned directory exclusion.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{CONVENTIONAL_IGNORES, SelectorConfig};
use crate::pattern::PatternSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinked directories, sockets, devices. Never descended into.
    Other,
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Directory listing capability used by [`FileSelector`].
pub trait DirSource {
    /// Kind of the walk root.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the path cannot be inspected.
    fn kind(&self, path: &Path) -> io::Result<EntryKind>;

    /// List one directory.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the directory cannot be read.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;
}

/// Local filesystem. Symlinks to files are treated as files, symlinks to
/// directories are not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsDirSource;

impl DirSource for OsDirSource {
    fn kind(&self, path: &Path) -> io::Result<EntryKind> {
        let meta = std::fs::metadata(path)?;
        Ok(if meta.is_dir() {
            EntryKind::Dir
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        })
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let ft = entry.file_type()?;
            let path = entry.path();
            let kind = if ft.is_dir() {
                EntryKind::Dir
            } else if ft.is_file() {
                EntryKind::File
            } else if ft.is_symlink() && std::fs::metadata(&path).is_ok_and(|m| m.is_file()) {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            out.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                kind,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub dirs_visited: usize,
    pub dirs_excluded: usize,
    pub files_visited: usize,
    pub files_included: usize,
    pub files_excluded: usize,
    pub dir_errors: usize,
    /// Included-file count per directory, keyed by relative path (`.` for the base).
    pub per_dir_included: BTreeMap<String, usize>,
}

/// Heuristic diagnostics. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionWarning {
    FewFiles { included: usize, threshold: usize },
    DominantDirectory { dir: String, count: usize, total: usize },
    ConventionallyIgnored { path: String },
}

impl std::fmt::Display for SelectionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FewFiles {
                included,
                threshold,
            } => write!(
                f,
                "only {included} file(s) selected (expected at least {threshold}); check include/exclude rules"
            ),
            Self::DominantDirectory { dir, count, total } => {
                write!(f, "directory {dir} contributes {count} of {total} selected files")
            }
            Self::ConventionallyIgnored { path } => {
                write!(f, "{path} lies under a directory that is usually ignored")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub files: Vec<PathBuf>,
    pub stats: SelectionStats,
    pub warnings: Vec<SelectionWarning>,
}

pub struct FileSelector {
    include_dirs: Vec<String>,
    dir_patterns: PatternSet,
    file_patterns: PatternSet,
    extensions: HashSet<String>,
    min_files_warning: usize,
    dominant_dir_ratio: f64,
    dominant_dir_min_files: usize,
}

impl FileSelector {
    #[must_use]
    pub fn new(config: &SelectorConfig) -> Self {
        Self {
            include_dirs: config
                .include_dirs
                .iter()
                .map(|d| normalize_rel(d).to_owned())
                .filter(|d| !d.is_empty())
                .collect(),
            dir_patterns: PatternSet::new(&config.exclude_dirs),
            file_patterns: PatternSet::new(&config.exclude_files),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_owned())
                .filter(|e| !e.is_empty())
                .collect(),
            min_files_warning: config.min_files_warning,
            dominant_dir_ratio: config.dominant_dir_ratio,
            dominant_dir_min_files: config.dominant_dir_min_files,
        }
    }

    /// Walk `base` on the local filesystem.
    #[must_use]
    pub fn collect(&self, base: &Path) -> Selection {
        self.collect_with(base, &OsDirSource)
    }

    /// Walk `base` through `source`. Unreadable directories count as empty.
    #[must_use]
    pub fn collect_with(&self, base: &Path, source: &dyn DirSource) -> Selection {
        let mut selection = Selection::default();

        match source.kind(base) {
            Ok(EntryKind::File) => {
                selection.stats.files_visited = 1;
                let name = base
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.file_included(&name) {
                    selection.stats.files_included = 1;
                    selection.files.push(base.to_path_buf());
                } else {
                    selection.stats.files_excluded = 1;
                }
                return selection;
            }
            Ok(EntryKind::Dir) => {}
            Ok(EntryKind::Other) => return selection,
            Err(e) => {
                tracing::warn!(path = %base.display(), "cannot inspect base path: {e}");
                selection.stats.dir_errors += 1;
                return selection;
            }
        }

        let mut stack: Vec<(PathBuf, String)> = vec![(base.to_path_buf(), String::new())];
        while let Some((dir, rel)) = stack.pop() {
            selection.stats.dirs_visited += 1;
            let mut entries = match source.read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), "skipping unreadable directory: {e}");
                    selection.stats.dir_errors += 1;
                    Vec::new()
                }
            };
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            let mut subdirs = Vec::new();
            let mut included_here = 0usize;
            for entry in entries {
                let child_rel = join_rel(&rel, &entry.name);
                match entry.kind {
                    EntryKind::File => {
                        selection.stats.files_visited += 1;
                        if self.file_included(&child_rel) {
                            included_here += 1;
                            selection.files.push(entry.path);
                        } else {
                            selection.stats.files_excluded += 1;
                        }
                    }
                    EntryKind::Dir => {
                        if self.dir_excluded(&child_rel) {
                            tracing::trace!(dir = %child_rel, "pruned");
                            selection.stats.dirs_excluded += 1;
                        } else {
                            subdirs.push((entry.path, child_rel));
                        }
                    }
                    EntryKind::Other => {}
                }
            }

            if included_here > 0 {
                let key = if rel.is_empty() { ".".to_owned() } else { rel };
                selection.stats.per_dir_included.insert(key, included_here);
                selection.stats.files_included += included_here;
            }
            stack.extend(subdirs.into_iter().rev());
        }

        selection.warnings = self.diagnose(base, &selection);
        for w in &selection.warnings {
            tracing::warn!("{w}");
        }
        tracing::debug!(
            dirs = selection.stats.dirs_visited,
            files = selection.stats.files_visited,
            included = selection.stats.files_included,
            "file selection finished"
        );
        selection
    }

    /// Whether a file at `rel` (relative to the walk base, `/`-separated)
    /// passes the extension and file-pattern filters.
    #[must_use]
    pub fn file_included(&self, rel: &str) -> bool {
        if !self.extensions.is_empty() {
            let ext = Path::new(rel).extension().and_then(|e| e.to_str());
            if !ext.is_some_and(|e| self.extensions.contains(e)) {
                return false;
            }
        }
        !self.file_patterns.excluded(rel, false)
    }

    /// Whether the directory at `rel` is pruned from the walk.
    #[must_use]
    pub fn dir_excluded(&self, rel: &str) -> bool {
        let rel = normalize_rel(rel);
        if !self.include_dirs.is_empty() {
            if self.include_dirs.iter().any(|inc| is_within(rel, inc)) {
                return false;
            }
            if !self.include_dirs.iter().any(|inc| is_within(inc, rel)) {
                return true;
            }
        }
        self.dir_patterns.excluded(rel, true)
    }

    /// Whether `path` would be selected by a walk from `base`, checking every
    /// ancestor directory as well.
    #[must_use]
    pub fn accepts(&self, base: &Path, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(base) else {
            return false;
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some((_, dirs)) = parts.split_last() else {
            return false;
        };
        let mut acc = String::new();
        for d in dirs {
            acc = join_rel(&acc, d);
            if self.dir_excluded(&acc) {
                return false;
            }
        }
        self.file_included(&parts.join("/"))
    }

    fn diagnose(&self, base: &Path, selection: &Selection) -> Vec<SelectionWarning> {
        let mut warnings = Vec::new();
        let total = selection.stats.files_included;

        if total < self.min_files_warning {
            warnings.push(SelectionWarning::FewFiles {
                included: total,
                threshold: self.min_files_warning,
            });
        }

        if total >= self.dominant_dir_min_files
            && selection.stats.per_dir_included.len() > 1
            && let Some((dir, &count)) = selection
                .stats
                .per_dir_included
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        {
            #[allow(clippy::cast_precision_loss)]
            let share = count as f64 / total as f64;
            if share > self.dominant_dir_ratio {
                warnings.push(SelectionWarning::DominantDirectory {
                    dir: dir.clone(),
                    count,
                    total,
                });
            }
        }

        for file in &selection.files {
            let Ok(rel) = file.strip_prefix(base) else {
                continue;
            };
            let under_ignored = rel
                .parent()
                .into_iter()
                .flat_map(Path::components)
                .any(|c| {
                    c.as_os_str()
                        .to_str()
                        .is_some_and(|name| CONVENTIONAL_IGNORES.contains(&name))
                });
            if under_ignored {
                warnings.push(SelectionWarning::ConventionallyIgnored {
                    path: rel.to_string_lossy().replace('\\', "/"),
                });
            }
        }

        warnings
    }
}

fn normalize_rel(p: &str) -> &str {
    let mut p = p;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.trim_matches('/')
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

/// `path` equals `dir` or lies beneath it.
fn is_within(path: &str, dir: &str) -> bool {
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}
