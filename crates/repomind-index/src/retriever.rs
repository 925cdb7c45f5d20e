//! Hybrid retrieval: vector similarity over chunks, widened with chunks from
//! structurally related files.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use repomind_store::VectorFilter;

use crate::config::RetrievalConfig;
use crate::context::estimate_tokens;
use crate::document::{ChunkKind, document_id};
use crate::error::{IndexError, Result};
use crate::repo_map::{ImportResolver, RepoMap};
use crate::store::{DOCUMENT_ID_KEY, IndexStore, StoredEntry, keys};

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// Direct vector match.
    Vector,
    /// Pulled in because its file is related to a vector match.
    Structural,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: Option<ChunkKind>,
    pub name: Option<String>,
    pub score: f32,
    pub source: MatchSource,
}

impl RetrievalResult {
    fn from_entry(entry: StoredEntry, score: f32, source: MatchSource) -> Self {
        let document_id = entry
            .str_field(DOCUMENT_ID_KEY)
            .map_or_else(|| entry.id.clone(), str::to_owned);
        Self {
            start_line: entry.usize_field(keys::START_LINE).unwrap_or(1),
            end_line: entry.usize_field(keys::END_LINE).unwrap_or(1),
            kind: entry.str_field(keys::KIND).and_then(|k| k.parse().ok()),
            name: entry
                .str_field(keys::NAME)
                .filter(|n| !n.is_empty())
                .map(str::to_owned),
            chunk_id: entry.id,
            content: entry.content,
            document_id,
            score,
            source,
        }
    }

    /// Ranking order: score descending, then document id, start line and
    /// chunk id ascending.
    #[must_use]
    pub fn ranking(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.document_id.cmp(&other.document_id))
            .then_with(|| self.start_line.cmp(&other.start_line))
            .then_with(|| self.chunk_id.cmp(&other.chunk_id))
    }
}

/// Repository structure consulted for the structural stage.
pub struct StructuralContext {
    pub map: Arc<RepoMap>,
    pub resolver: Arc<dyn ImportResolver>,
}

pub struct HybridRetriever {
    store: Arc<IndexStore>,
    structure: Option<StructuralContext>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    #[must_use]
    pub fn new(store: Arc<IndexStore>, config: RetrievalConfig) -> Self {
        Self {
            store,
            structure: None,
            config,
        }
    }

    #[must_use]
    pub fn with_structure(mut self, map: Arc<RepoMap>, resolver: Arc<dyn ImportResolver>) -> Self {
        self.structure = Some(StructuralContext { map, resolver });
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve with the configured result count and structural toggle.
    ///
    /// # Errors
    ///
    /// See [`HybridRetriever::retrieve`].
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        self.retrieve(query, self.config.max_results, self.config.use_structural_context)
            .await
    }

    /// Top `k` chunks for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Retrieval`] if the query cannot be embedded or
    /// the store cannot be searched. An empty list means nothing matched.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        use_structural_context: bool,
    ) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self
            .store
            .embedder()
            .embed(query)
            .await
            .map_err(|e| IndexError::Retrieval(format!("query embedding failed: {e}")))?;

        let fetch = k.saturating_mul(self.config.candidate_multiplier.max(1));
        let candidates = self
            .store
            .search_chunks(query_vector.clone(), fetch, None)
            .await
            .map_err(|e| IndexError::Retrieval(format!("chunk search failed: {e}")))?;

        let mut merged: HashMap<String, RetrievalResult> = candidates
            .into_iter()
            .map(|entry| {
                let score = entry.score;
                let result = RetrievalResult::from_entry(entry, score, MatchSource::Vector);
                (result.chunk_id.clone(), result)
            })
            .collect();

        if use_structural_context && let Some(structure) = &self.structure {
            let mut direct: Vec<RetrievalResult> = merged.values().cloned().collect();
            direct.sort_by(RetrievalResult::ranking);
            direct.truncate(k);
            for extra in self.structural_candidates(structure, &direct, &query_vector).await? {
                match merged.get_mut(&extra.chunk_id) {
                    Some(existing) if existing.source == MatchSource::Vector => {}
                    Some(existing) => {
                        if extra.score > existing.score {
                            *existing = extra;
                        }
                    }
                    None => {
                        merged.insert(extra.chunk_id.clone(), extra);
                    }
                }
            }
        }

        let mut results: Vec<RetrievalResult> = merged.into_values().collect();
        results.sort_by(RetrievalResult::ranking);
        results.truncate(k);
        tracing::debug!(query_len = query.len(), results = results.len(), "retrieval finished");
        Ok(results)
    }

    /// Best chunk of each file related to a direct match, scored at a
    /// discount of the originating match.
    async fn structural_candidates(
        &self,
        structure: &StructuralContext,
        direct: &[RetrievalResult],
        query_vector: &[f32],
    ) -> Result<Vec<RetrievalResult>> {
        let root = structure.map.root_path();
        let mut best_in_file: HashMap<String, Option<StoredEntry>> = HashMap::new();
        let mut visited_origins = BTreeSet::new();
        let mut out = Vec::new();

        for origin in direct {
            if !visited_origins.insert(origin.document_id.clone()) {
                continue;
            }
            let related = structure
                .map
                .get_related_files(Path::new(&origin.document_id), structure.resolver.as_ref());
            for path in related
                .iter()
                .take(self.config.related_per_candidate)
            {
                let Some(id) = document_id(root, path) else {
                    continue;
                };
                if id == origin.document_id {
                    continue;
                }
                if !best_in_file.contains_key(&id) {
                    let top = self
                        .store
                        .search_chunks(
                            query_vector.to_vec(),
                            1,
                            Some(VectorFilter::text_eq(DOCUMENT_ID_KEY, id.clone())),
                        )
                        .await
                        .map_err(|e| {
                            IndexError::Retrieval(format!("related chunk search failed: {e}"))
                        })?;
                    best_in_file.insert(id.clone(), top.into_iter().next());
                }
                if let Some(Some(entry)) = best_in_file.get(&id) {
                    let score = origin.score * self.config.structural_discount;
                    out.push(RetrievalResult::from_entry(
                        entry.clone(),
                        score,
                        MatchSource::Structural,
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Render results as `<code_context>` XML for prompt assembly. Empty input
/// gives an empty string.
#[must_use]
pub fn format_as_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for result in results {
        let name = result
            .name
            .as_deref()
            .or(result.kind.map(ChunkKind::as_str))
            .unwrap_or("chunk");
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" name=\"{}\" score=\"{:.2}\">",
            result.document_id, result.start_line, result.end_line, name, result.score,
        );
        out.push_str(&result.content);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}

/// Approximate token cost of the results' content.
#[must_use]
pub fn total_tokens(results: &[RetrievalResult]) -> usize {
    results.iter().map(|r| estimate_tokens(&r.content)).sum()
}
