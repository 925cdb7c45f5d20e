//! `repomind` command line: select, map, parse, index and search a codebase.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use repomind_index::context::chunk_display_header;
use repomind_index::{
    Chunker, CodeIndexer, Config, Document, DocumentMetadata, FileSelector, HashingEmbedder,
    HybridRetriever, IndexStore, IndexWatcher, PathImportResolver, RepoMap, SymbolParser,
    format_as_context,
};
use repomind_store::SqliteVectorStore;
use tokio_util::sync::CancellationToken;

/// Index a source repository and retrieve code for natural-language queries.
#[derive(Parser)]
#[command(name = "repomind", version, about)]
struct Cli {
    /// Configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "repomind.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files the selector would index, with diagnostics.
    Scan {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Print a compact repository map.
    Map {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Token budget for the rendered map.
        #[arg(long, default_value_t = 1024)]
        tokens: usize,
    },

    /// Show the imports, definitions and chunks of one file.
    Symbols { file: PathBuf },

    /// Index a directory into the local database.
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Database file. Defaults to `.repomind/index.db` under the path.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Keep running and re-index files as they change.
        #[arg(long)]
        watch: bool,
    },

    /// Retrieve the chunks most relevant to a query.
    Search {
        query: String,

        #[arg(long, default_value = ".")]
        path: PathBuf,

        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of results. Defaults to `retrieval.max_results`.
        #[arg(short, long)]
        k: Option<usize>,

        /// Vector similarity only; skip related-file expansion.
        #[arg(long)]
        no_structural: bool,

        /// Print results as a `<code_context>` block.
        #[arg(long)]
        xml: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Scan { path } => scan(&path, &config),
        Commands::Map { path, tokens } => map(&path, &config, tokens).await,
        Commands::Symbols { file } => symbols(&file, &config),
        Commands::Index { path, db, watch } => index(&path, db, watch, &config).await,
        Commands::Search {
            query,
            path,
            db,
            k,
            no_structural,
            xml,
        } => search(&query, &path, db, k, !no_structural, xml, &config).await,
    }
}

fn scan(path: &Path, config: &Config) -> anyhow::Result<()> {
    let selection = FileSelector::new(&config.selector).collect(path);
    for file in &selection.files {
        println!("{}", file.display());
    }
    let stats = &selection.stats;
    eprintln!(
        "{} of {} files selected, {} directories visited, {} pruned",
        stats.files_included, stats.files_visited, stats.dirs_visited, stats.dirs_excluded
    );
    for warning in &selection.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Parse every selected file under `root` without touching the index.
async fn parse_tree(root: &Path, config: &Config) -> anyhow::Result<Vec<DocumentMetadata>> {
    let root = root.to_path_buf();
    let selector = FileSelector::new(&config.selector);
    tokio::task::spawn_blocking(move || {
        let parser = SymbolParser::default();
        let mut out = Vec::new();
        for file in selector.collect(&root).files {
            match Document::read(&file) {
                Ok(mut doc) => {
                    parser.parse(&mut doc);
                    out.push(doc.metadata);
                }
                Err(e) => tracing::warn!(path = %file.display(), "cannot read: {e}"),
            }
        }
        out
    })
    .await
    .context("parse worker failed")
}

async fn map(path: &Path, config: &Config, tokens: usize) -> anyhow::Result<()> {
    let documents = parse_tree(path, config).await?;
    let repo_map = RepoMap::from_documents(&documents, path);
    println!("{}", repo_map.render(tokens));
    Ok(())
}

fn symbols(file: &Path, config: &Config) -> anyhow::Result<()> {
    let mut doc = Document::read(file).with_context(|| format!("reading {}", file.display()))?;
    let Some(lang) = doc.language() else {
        bail!("unrecognized language for {}", file.display());
    };
    let parser = Arc::new(SymbolParser::default());
    let structure = parser.parse(&mut doc);
    if structure.is_none() {
        eprintln!("no {lang} grammar compiled in; showing a single module chunk");
    }
    let chunks = Chunker::new(config.chunker.clone(), Arc::clone(&parser))
        .chunk_with(&doc, structure.as_ref());

    let meta = &doc.metadata;
    println!("language: {lang}");
    if let Some(doc_comment) = &meta.doc_comment {
        println!("doc: {doc_comment}");
    }
    for import in &meta.imports {
        println!("import: {import}");
    }
    for (name, lines) in &meta.symbols {
        let lines: Vec<String> = lines.iter().map(ToString::to_string).collect();
        println!("symbol: {name} @ {}", lines.join(", "));
    }
    let display = file.to_string_lossy();
    for chunk in &chunks {
        println!("chunk: {}", chunk_display_header(&display, chunk));
    }
    Ok(())
}

async fn open_store(root: &Path, db: Option<PathBuf>) -> anyhow::Result<Arc<IndexStore>> {
    let db = db.unwrap_or_else(|| root.join(".repomind").join("index.db"));
    if let Some(parent) = db.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let backend = SqliteVectorStore::open(&db.to_string_lossy())
        .await
        .with_context(|| format!("opening {}", db.display()))?;
    Ok(Arc::new(IndexStore::new(
        Arc::new(backend),
        Arc::new(HashingEmbedder::default()),
    )))
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        child.cancel();
    });
    token
}

async fn index(
    path: &Path,
    db: Option<PathBuf>,
    watch: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let store = open_store(path, db).await?;
    let indexer = Arc::new(CodeIndexer::new(store, config));
    let cancel = shutdown_token();

    let outcome = indexer.index_project(path, &cancel).await?;
    let report = &outcome.report;
    println!(
        "scanned {} files: {} indexed, {} unchanged, {} skipped, {} removed, {} chunks in {} ms",
        report.files_scanned,
        report.files_indexed,
        report.files_unchanged,
        report.files_skipped,
        report.documents_removed,
        report.chunks_created,
        report.duration_ms,
    );
    for (file, error) in &report.failures {
        eprintln!("failed: {file}: {error}");
    }
    if report.cancelled {
        eprintln!("indexing was cancelled");
        return Ok(());
    }

    if watch {
        let _watcher = IndexWatcher::start(path, Arc::clone(&indexer))?;
        tracing::info!("watching {} for changes", path.display());
        cancel.cancelled().await;
    }
    Ok(())
}

async fn search(
    query: &str,
    path: &Path,
    db: Option<PathBuf>,
    k: Option<usize>,
    structural: bool,
    xml: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let store = open_store(path, db).await?;
    let mut retriever = HybridRetriever::new(store, config.retrieval.clone());
    let structural = structural && config.retrieval.use_structural_context;
    if structural {
        let documents = parse_tree(path, config).await?;
        let repo_map = Arc::new(RepoMap::from_documents(&documents, path));
        let resolver = Arc::new(PathImportResolver::from_map(&repo_map));
        retriever = retriever.with_structure(repo_map, resolver);
    }

    let k = k.unwrap_or(config.retrieval.max_results);
    let results = retriever.retrieve(query, k, structural).await?;
    if results.is_empty() {
        eprintln!("no matches; has `repomind index` been run?");
        return Ok(());
    }
    if xml {
        println!("{}", format_as_context(&results));
        return Ok(());
    }
    for result in &results {
        let name = result.name.as_deref().unwrap_or("-");
        println!(
            "{:.3}  {}:{}-{}  {name}",
            result.score, result.document_id, result.start_line, result.end_line
        );
    }
    Ok(())
}
