use std::path::{Path, PathBuf};
use std::sync::Arc;

use repomind_index::config::SelectorConfig;
use repomind_index::store::{ChunkRecord, DOCUMENT_ID_KEY, Metadata, chunk_id};
use repomind_index::{
    CodeIndexer, Config, FileSelector, HashingEmbedder, HybridRetriever, IndexStore,
    PathImportResolver, RepoMap,
};
use repomind_store::InMemoryVectorStore;
use tokio_util::sync::CancellationToken;

// -- Helpers --

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn rel_names(root: &Path, files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|f| {
            f.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

fn selector(exclude_dirs: &[&str], exclude_files: &[&str]) -> FileSelector {
    FileSelector::new(&SelectorConfig {
        include_dirs: Vec::new(),
        exclude_dirs: exclude_dirs.iter().map(|s| (*s).to_owned()).collect(),
        exclude_files: exclude_files.iter().map(|s| (*s).to_owned()).collect(),
        extensions: Vec::new(),
        ..SelectorConfig::default()
    })
}

fn memory_store(dims: usize) -> Arc<IndexStore> {
    Arc::new(IndexStore::new(
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HashingEmbedder::new(dims)),
    ))
}

/// Small deterministic generator for distractor vectors.
struct XorShift(u64);

impl XorShift {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        #[allow(clippy::cast_precision_loss)]
        let unit = (self.0 >> 40) as f32 / (1u64 << 24) as f32;
        unit * 2.0 - 1.0
    }

    fn vector(&mut self, dims: usize) -> Vec<f32> {
        (0..dims).map(|_| self.next_f32()).collect()
    }
}

// -- Selection --

#[test]
fn collects_sources_and_drops_compiled_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def foo():\n    return 1\n");
    write(
        dir.path(),
        "b.py",
        "class Bar:\n    def baz(self):\n        return 2\n",
    );
    write(dir.path(), "b.pyc", "\u{0}compiled");

    let selection = selector(&[], &["*.pyc"]).collect(dir.path());
    assert_eq!(rel_names(dir.path(), &selection.files), ["a.py", "b.py"]);
}

#[test]
fn excluded_vendor_directory_is_pruned() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "main.py", "x = 1\n");
    write(dir.path(), "vendor/lib.py", "y = 2\n");
    write(dir.path(), "vendor/deep/more.py", "z = 3\n");

    let config = SelectorConfig {
        exclude_dirs: vec!["vendor/".into()],
        exclude_files: Vec::new(),
        extensions: vec!["py".into()],
        ..SelectorConfig::default()
    };
    let selection = FileSelector::new(&config).collect(dir.path());
    assert_eq!(rel_names(dir.path(), &selection.files), ["main.py"]);
    assert_eq!(selection.stats.dirs_excluded, 1);
}

#[cfg(feature = "lang-python")]
#[test]
fn class_and_method_become_separate_chunks() {
    use repomind_index::{ChunkKind, Chunker, Document, SymbolParser};

    let parser = Arc::new(SymbolParser::default());
    let chunker = Chunker::new(Config::default().chunker, Arc::clone(&parser));
    let mut doc = Document::new(
        "b.py",
        "class Bar:\n    def baz(self):\n        return 2\n",
    );
    let structure = parser.parse(&mut doc);
    let chunks = chunker.chunk_with(&doc, structure.as_ref());

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].kind, ChunkKind::Class);
    assert_eq!(chunks[0].name(), Some("Bar"));
    assert_eq!(chunks[1].kind, ChunkKind::Method);
    assert_eq!(chunks[1].name(), Some("baz"));
    assert_eq!(chunks[1].parents, ["Bar"]);
    assert_eq!(doc.metadata.classes, ["Bar"]);
    assert_eq!(doc.metadata.symbols["baz"], [2]);
}

// -- Store and retrieval --

#[tokio::test]
async fn near_duplicate_query_ranks_target_first_among_distractors() {
    const DIMS: usize = 48;
    let store = memory_store(DIMS);
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);

    let target = rng.vector(DIMS);
    let mut records = vec![ChunkRecord {
        id: chunk_id("target.py", 0),
        content: "target".into(),
        metadata: Metadata::from([(DOCUMENT_ID_KEY.to_owned(), "target.py".into())]),
        embedding: Some(target.clone()),
    }];
    for i in 0..100 {
        let doc = format!("distractor_{i:03}.py");
        records.push(ChunkRecord {
            id: chunk_id(&doc, 0),
            content: format!("distractor {i}"),
            metadata: Metadata::from([(DOCUMENT_ID_KEY.to_owned(), doc.into())]),
            embedding: Some(rng.vector(DIMS)),
        });
    }
    store.add_chunks(records).await.unwrap();

    let query: Vec<f32> = target.iter().map(|x| x * 0.98 + 0.001).collect();
    let hits = store.search_chunks(query, 5, None).await.unwrap();
    assert_eq!(hits[0].id, "target.py::0");
    assert_eq!(hits.len(), 5);
}

#[tokio::test]
async fn reindexing_leaves_one_document_and_its_current_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def foo():\n    return 1\n");
    let store = memory_store(32);
    let mut config = Config::default();
    config.index.skip_unchanged = false;
    let indexer = CodeIndexer::new(Arc::clone(&store), &config);
    let token = CancellationToken::new();

    let first = indexer.index_project(dir.path(), &token).await.unwrap();
    let second = indexer.index_project(dir.path(), &token).await.unwrap();
    assert_eq!(first.report.chunks_created, second.report.chunks_created);

    assert_eq!(store.document_ids().await.unwrap(), ["a.py"]);
    let chunks = store.search_chunks(vec![1.0; 32], 100, None).await.unwrap();
    assert_eq!(chunks.len(), second.report.chunks_created);
}

#[tokio::test]
async fn retrieval_is_deterministic_over_an_indexed_tree() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app/models.py",
        "class User:\n    def save(self):\n        pass\n",
    );
    write(
        dir.path(),
        "app/main.py",
        "from app.models import User\n\ndef run():\n    User().save()\n",
    );
    write(dir.path(), "util.py", "def save_config(path):\n    pass\n");

    let store = memory_store(64);
    let indexer = CodeIndexer::new(Arc::clone(&store), &Config::default());
    let outcome = indexer
        .index_project(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.report.failures.is_empty());

    let map = Arc::new(RepoMap::from_documents(&outcome.documents, dir.path()));
    let resolver = Arc::new(PathImportResolver::from_map(&map));
    let retriever =
        HybridRetriever::new(Arc::clone(&store), Config::default().retrieval)
            .with_structure(map, resolver);

    let first = retriever.retrieve("save user", 4, true).await.unwrap();
    let second = retriever.retrieve("save user", 4, true).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
    for pair in first.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

// -- Repository map --

#[tokio::test]
async fn repo_map_from_indexed_documents_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    for rel in ["a.py", "pkg/b.py", "pkg/sub/c.py"] {
        write(dir.path(), rel, "x = 1\n");
    }
    let indexer = CodeIndexer::new(memory_store(16), &Config::default());
    let outcome = indexer
        .index_project(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    let map = RepoMap::from_documents(&outcome.documents, dir.path());
    for meta in &outcome.documents {
        let node = map.find_file(&meta.path).unwrap();
        assert_eq!(node.path, dir.path().join(&meta.path));
    }
    assert!(map.find_file(Path::new("/outside/a.py")).is_none());
    assert!(map.find_directory(Path::new("pkg/sub")).is_some());
}
