//! Pipeline configuration, loaded from TOML with `REPOMIND_*` overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

/// File selection rules. Directory and file patterns use gitignore syntax.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub include_dirs: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_exclude_files")]
    pub exclude_files: Vec<String>,
    /// Empty means every extension is accepted.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Warn when fewer files than this are selected.
    #[serde(default = "default_min_files_warning")]
    pub min_files_warning: usize,
    /// Warn when one directory contributes more than this share of the selection.
    #[serde(default = "default_dominant_dir_ratio")]
    pub dominant_dir_ratio: f64,
    /// The dominant-directory warning only applies above this many files.
    #[serde(default = "default_dominant_dir_min_files")]
    pub dominant_dir_min_files: usize,
}

pub(crate) const CONVENTIONAL_IGNORES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "dist",
    "build",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".idea",
    ".vscode",
    ".cache",
    ".repomind",
];

fn default_exclude_dirs() -> Vec<String> {
    CONVENTIONAL_IGNORES
        .iter()
        .map(|d| format!("{d}/"))
        .collect()
}

fn default_exclude_files() -> Vec<String> {
    ["*.pyc", "*.pyo", "*.so", "*.o", "*.a", "*.min.js", "*.lock"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_extensions() -> Vec<String> {
    [
        "rs", "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "mts", "cts", "tsx", "go",
    ]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_min_files_warning() -> usize {
    1
}

fn default_dominant_dir_ratio() -> f64 {
    0.6
}

fn default_dominant_dir_min_files() -> usize {
    50
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            exclude_files: default_exclude_files(),
            extensions: default_extensions(),
            min_files_warning: default_min_files_warning(),
            dominant_dir_ratio: default_dominant_dir_ratio(),
            dominant_dir_min_files: default_dominant_dir_min_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkerConfig {
    /// Chunks longer than this (in bytes) are split on paragraph boundaries.
    /// Zero disables the secondary split.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// A trailing fragment smaller than this takes lines back from the one
    /// before it, without exceeding `max_chunk_size`.
    #[serde(default = "default_min_fragment_size")]
    pub min_fragment_size: usize,
}

fn default_max_chunk_size() -> usize {
    4000
}

fn default_min_fragment_size() -> usize {
    200
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_fragment_size: default_min_fragment_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_use_structural_context")]
    pub use_structural_context: bool,
    /// Multiplier applied to the originating score of a structural neighbour.
    #[serde(default = "default_structural_discount")]
    pub structural_discount: f32,
    /// Related files consulted per vector candidate.
    #[serde(default = "default_related_per_candidate")]
    pub related_per_candidate: usize,
    /// Vector candidates fetched per requested result.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

fn default_max_results() -> usize {
    10
}

fn default_use_structural_context() -> bool {
    true
}

fn default_structural_discount() -> f32 {
    0.8
}

fn default_related_per_candidate() -> usize {
    3
}

fn default_candidate_multiplier() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            use_structural_context: default_use_structural_context(),
            structural_discount: default_structural_discount(),
            related_per_candidate: default_related_per_candidate(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Parse workers; zero means one per available core.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_skip_unchanged")]
    pub skip_unchanged: bool,
    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_skip_unchanged() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            skip_unchanged: default_skip_unchanged(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl IndexConfig {
    /// Effective worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting values are inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)
                .map_err(|e| IndexError::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REPOMIND_INCLUDE_DIRS") {
            self.selector.include_dirs = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOMIND_EXCLUDE_DIRS") {
            self.selector.exclude_dirs = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOMIND_EXCLUDE_FILES") {
            self.selector.exclude_files = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOMIND_EXTENSIONS") {
            self.selector.extensions = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOMIND_MAX_CHUNK_SIZE") {
            match v.parse::<usize>() {
                Ok(n) => self.chunker.max_chunk_size = n,
                Err(_) => tracing::warn!("ignoring invalid REPOMIND_MAX_CHUNK_SIZE value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("REPOMIND_MAX_RESULTS") {
            match v.parse::<usize>() {
                Ok(n) => self.retrieval.max_results = n,
                Err(_) => tracing::warn!("ignoring invalid REPOMIND_MAX_RESULTS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("REPOMIND_STRUCTURAL_CONTEXT") {
            match v.parse::<bool>() {
                Ok(b) => self.retrieval.use_structural_context = b,
                Err(_) => {
                    tracing::warn!("ignoring invalid REPOMIND_STRUCTURAL_CONTEXT value: {v}");
                }
            }
        }
        if let Ok(v) = std::env::var("REPOMIND_WORKERS") {
            match v.parse::<usize>() {
                Ok(n) => self.index.workers = n,
                Err(_) => tracing::warn!("ignoring invalid REPOMIND_WORKERS value: {v}"),
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Config`] describing the first inconsistent value.
    pub fn validate(&self) -> Result<()> {
        let d = self.retrieval.structural_discount;
        if !(d > 0.0 && d <= 1.0) {
            return Err(IndexError::Config(format!(
                "retrieval.structural_discount must be in (0, 1], got {d}"
            )));
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err(IndexError::Config(
                "retrieval.candidate_multiplier must be at least 1".into(),
            ));
        }
        let r = self.selector.dominant_dir_ratio;
        if !(r > 0.0 && r <= 1.0) {
            return Err(IndexError::Config(format!(
                "selector.dominant_dir_ratio must be in (0, 1], got {r}"
            )));
        }
        if self.chunker.max_chunk_size > 0
            && self.chunker.min_fragment_size >= self.chunker.max_chunk_size
        {
            return Err(IndexError::Config(
                "chunker.min_fragment_size must be smaller than chunker.max_chunk_size".into(),
            ));
        }
        Ok(())
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    const ENV_KEYS: [&str; 8] = [
        "REPOMIND_INCLUDE_DIRS",
        "REPOMIND_EXCLUDE_DIRS",
        "REPOMIND_EXCLUDE_FILES",
        "REPOMIND_EXTENSIONS",
        "REPOMIND_MAX_CHUNK_SIZE",
        "REPOMIND_MAX_RESULTS",
        "REPOMIND_STRUCTURAL_CONTEXT",
        "REPOMIND_WORKERS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn load_missing_file_uses_defaults() {
        clear_env();
        let config = Config::load(Path::new("/nonexistent/repomind.toml")).unwrap();
        assert_eq!(config.retrieval.max_results, 10);
        assert!(config.retrieval.use_structural_context);
        assert!(config.selector.include_dirs.is_empty());
        assert!(config.selector.exclude_dirs.contains(&"node_modules/".to_owned()));
        assert!(config.selector.exclude_files.contains(&"*.pyc".to_owned()));
    }

    #[test]
    fn default_extensions_cover_every_parsed_language() {
        use crate::languages::{Lang, detect_language};

        let defaults = default_extensions();
        let candidates = [
            "rs", "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "mts", "cts", "tsx", "go", "sh",
            "toml", "json", "md",
        ];
        for ext in candidates {
            let parsed = detect_language(Path::new(&format!("x.{ext}"))).is_some_and(|l| {
                matches!(
                    l,
                    Lang::Rust | Lang::Python | Lang::JavaScript | Lang::TypeScript | Lang::Tsx | Lang::Go
                )
            });
            assert_eq!(defaults.contains(&ext.to_owned()), parsed, "extension {ext}");
        }
    }

    #[test]
    #[serial]
    fn load_partial_toml_keeps_other_defaults() {
        clear_env();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[selector]\nextensions = [\"py\"]\n\n[retrieval]\nmax_results = 3\n"
        )
        .unwrap();
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.selector.extensions, vec!["py"]);
        assert_eq!(config.retrieval.max_results, 3);
        assert_eq!(config.chunker.max_chunk_size, 4000);
        assert!(config.index.skip_unchanged);
    }

    #[test]
    #[serial]
    fn load_invalid_toml_is_config_error() {
        clear_env();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[selector\nbroken").unwrap();
        assert!(matches!(Config::load(f.path()), Err(IndexError::Config(_))));
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        clear_env();
        unsafe { std::env::set_var("REPOMIND_EXTENSIONS", "py, rs , ") };
        unsafe { std::env::set_var("REPOMIND_MAX_RESULTS", "25") };
        unsafe { std::env::set_var("REPOMIND_STRUCTURAL_CONTEXT", "false") };
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();
        assert_eq!(config.selector.extensions, vec!["py", "rs"]);
        assert_eq!(config.retrieval.max_results, 25);
        assert!(!config.retrieval.use_structural_context);
    }

    #[test]
    #[serial]
    fn invalid_env_value_is_ignored() {
        clear_env();
        unsafe { std::env::set_var("REPOMIND_WORKERS", "many") };
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();
        assert_eq!(config.index.workers, 0);
    }

    #[test]
    fn validate_rejects_bad_discount() {
        let mut config = Config::default();
        config.retrieval.structural_discount = 1.5;
        assert!(matches!(config.validate(), Err(IndexError::Config(_))));
        config.retrieval.structural_discount = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_fragment_larger_than_chunk() {
        let mut config = Config::default();
        config.chunker.max_chunk_size = 100;
        config.chunker.min_fragment_size = 100;
        assert!(config.validate().is_err());
        config.chunker.max_chunk_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn worker_count_defaults_to_cores() {
        let mut index = IndexConfig::default();
        assert!(index.worker_count() >= 1);
        index.workers = 3;
        assert_eq!(index.worker_count(), 3);
    }

    #[test]
    fn config_serializes_back_to_toml() {
        let text = toml::to_string(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.retrieval.related_per_candidate, 3);
    }
}
