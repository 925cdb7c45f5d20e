//! Document and chunk collections over a [`VectorStore`] backend.
//!
//! Two collections are kept: whole documents and chunks. Every chunk carries
//! a `document_id` payload field, and deleting a document deletes its chunks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use repomind_store::{Payload, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::embed::Embedder;
use crate::error::{IndexError, Result};

pub const DOCUMENTS_COLLECTION: &str = "repomind_documents";
pub const CHUNKS_COLLECTION: &str = "repomind_chunks";

/// Payload key linking a chunk to its document.
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Payload keys written by the indexer for chunks and documents.
pub mod keys {
    pub const PATH: &str = "path";
    pub const LANGUAGE: &str = "language";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const PARENTS: &str = "parents";
    pub const START_LINE: &str = "start_line";
    pub const END_LINE: &str = "end_line";
    pub const CONTENT_HASH: &str = "content_hash";
}

/// Payload key holding the stored text.
const CONTENT_KEY: &str = "content";

/// Separator used when flattening sequences.
const SEQUENCE_SEPARATOR: &str = ",";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Metadata as supplied by callers, before sanitation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
    Mapping(BTreeMap<String, MetadataValue>),
    Null,
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Scalar(Scalar::Str(s.to_owned()))
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Scalar(Scalar::Str(s))
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Scalar(Scalar::Int(i))
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or_else(|_| Self::Scalar(Scalar::Str(i.to_string())), Self::from)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Scalar(Scalar::Bool(b))
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(v: Vec<String>) -> Self {
        Self::Sequence(v.into_iter().map(Scalar::Str).collect())
    }
}

impl<T: Into<MetadataValue>> From<Option<T>> for MetadataValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

impl Scalar {
    fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or_else(|| Value::String(f.to_string()), Value::Number),
            Self::Bool(b) => Value::Bool(*b),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl MetadataValue {
    /// Nested form used when a mapping is encoded as a JSON string.
    fn to_nested_json(&self) -> Value {
        match self {
            Self::Scalar(s) => s.to_json(),
            Self::Sequence(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Self::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_nested_json()))
                    .collect(),
            ),
            Self::Null => Value::Null,
        }
    }
}

/// Reduce a metadata value to a storable scalar. `Null` yields `None` and is
/// dropped by the caller.
#[must_use]
pub fn sanitize_value(value: &MetadataValue) -> Option<Value> {
    match value {
        MetadataValue::Scalar(s) => Some(s.to_json()),
        MetadataValue::Sequence(items) => Some(Value::String(
            items
                .iter()
                .map(Scalar::to_text)
                .collect::<Vec<_>>()
                .join(SEQUENCE_SEPARATOR),
        )),
        MetadataValue::Mapping(_) => Some(Value::String(value.to_nested_json().to_string())),
        MetadataValue::Null => None,
    }
}

#[must_use]
pub fn sanitize(metadata: &Metadata) -> Payload {
    metadata
        .iter()
        .filter_map(|(k, v)| sanitize_value(v).map(|v| (k.clone(), v)))
        .collect()
}

/// A stored document or chunk returned by a search or lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, Value>,
    pub score: f32,
}

impl StoredEntry {
    fn from_scored(point: ScoredVectorPoint) -> Self {
        let mut metadata = point.payload;
        let content = take_content(&mut metadata);
        Self {
            id: point.id,
            content,
            metadata,
            score: point.score,
        }
    }

    fn from_point(point: VectorPoint) -> Self {
        let mut metadata = point.payload;
        let content = take_content(&mut metadata);
        Self {
            id: point.id,
            content,
            metadata,
            score: 1.0,
        }
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn usize_field(&self, key: &str) -> Option<usize> {
        self.metadata
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }
}

fn take_content(payload: &mut Payload) -> String {
    match payload.remove(CONTENT_KEY) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

/// One chunk to be written through [`IndexStore::add_chunks`].
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

/// Chunk ids are derived from the owning document id and the chunk position.
#[must_use]
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}::{index}")
}

/// Document/chunk index over a vector backend.
pub struct IndexStore {
    backend: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    // Serializes delete-then-add sequences so concurrent writers to one id
    // leave a single consistent chunk set (last writer wins).
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore").finish_non_exhaustive()
    }
}

impl IndexStore {
    #[must_use]
    pub fn new(backend: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            backend,
            embedder,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    async fn embed_or(&self, text: &str, given: Option<Vec<f32>>) -> Result<Vec<f32>> {
        match given {
            Some(v) => Ok(v),
            None => Ok(self.embedder.embed(text).await?),
        }
    }

    async fn ensure(&self, collection: &str, dims: usize) -> Result<()> {
        self.backend
            .ensure_collection(collection, u64::try_from(dims)?)
            .await?;
        Ok(())
    }

    /// Store a whole document. The embedding is computed from `content` when
    /// not supplied. Returns the id, which is also stored under
    /// [`DOCUMENT_ID_KEY`].
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the backend write fails.
    pub async fn add_document(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
        embedding: Option<Vec<f32>>,
    ) -> Result<String> {
        let vector = self.embed_or(content, embedding).await?;
        self.ensure(DOCUMENTS_COLLECTION, vector.len()).await?;

        let mut payload = sanitize(metadata);
        payload.insert(CONTENT_KEY.into(), Value::String(content.to_owned()));
        payload.insert(DOCUMENT_ID_KEY.into(), Value::String(id.to_owned()));
        self.backend
            .upsert(
                DOCUMENTS_COLLECTION,
                vec![VectorPoint {
                    id: id.to_owned(),
                    vector,
                    payload,
                }],
            )
            .await?;
        Ok(id.to_owned())
    }

    /// Store chunks. Each record's metadata should carry
    /// [`DOCUMENT_ID_KEY`] so that deletion cascades.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the backend write fails.
    pub async fn add_chunks(&self, records: Vec<ChunkRecord>) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            let vector = self.embed_or(&record.content, record.embedding).await?;
            let mut payload = sanitize(&record.metadata);
            payload.insert(CONTENT_KEY.into(), Value::String(record.content));
            points.push(VectorPoint {
                id: record.id,
                vector,
                payload,
            });
        }
        let dims = points.first().map_or(0, |p| p.vector.len());
        if let Some(bad) = points.iter().find(|p| p.vector.len() != dims) {
            return Err(IndexError::Other(format!(
                "chunk {} has {} dimensions, expected {dims}",
                bad.id,
                bad.vector.len()
            )));
        }
        self.ensure(CHUNKS_COLLECTION, dims).await?;
        let ids = points.iter().map(|p| p.id.clone()).collect();
        self.backend.upsert(CHUNKS_COLLECTION, points).await?;
        Ok(ids)
    }

    async fn search(
        &self,
        collection: &str,
        query: Vec<f32>,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<StoredEntry>> {
        if k == 0 || !self.backend.collection_exists(collection).await? {
            return Ok(Vec::new());
        }
        let hits = self
            .backend
            .search(collection, query, u64::try_from(k)?, filter)
            .await?;
        Ok(hits.into_iter().map(StoredEntry::from_scored).collect())
    }

    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub async fn search_documents(
        &self,
        query: Vec<f32>,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<StoredEntry>> {
        self.search(DOCUMENTS_COLLECTION, query, k, filter).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub async fn search_chunks(
        &self,
        query: Vec<f32>,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<StoredEntry>> {
        self.search(CHUNKS_COLLECTION, query, k, filter).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend lookup fails.
    pub async fn get_document(&self, id: &str) -> Result<Option<StoredEntry>> {
        let mut found = self
            .backend
            .get(DOCUMENTS_COLLECTION, vec![id.to_owned()])
            .await?;
        Ok(found.pop().map(StoredEntry::from_point))
    }

    /// Delete a document and every chunk referencing it. Returns the number
    /// of chunks removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend delete fails.
    pub async fn delete_document(&self, id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.delete_unlocked(id).await
    }

    async fn delete_unlocked(&self, id: &str) -> Result<usize> {
        let removed = self
            .backend
            .delete_by_filter(CHUNKS_COLLECTION, VectorFilter::text_eq(DOCUMENT_ID_KEY, id))
            .await?;
        if self.backend.collection_exists(DOCUMENTS_COLLECTION).await? {
            self.backend
                .delete_by_ids(DOCUMENTS_COLLECTION, vec![id.to_owned()])
                .await?;
        }
        Ok(removed)
    }

    /// Delete-then-add of a document and its chunks as one serialized step.
    /// Re-indexing the same id never duplicates chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or a backend call fails.
    pub async fn replace_document(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
        embedding: Option<Vec<f32>>,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.delete_unlocked(id).await?;
        self.add_document(id, content, metadata, embedding).await?;
        Ok(self.add_chunks(chunks).await?.len())
    }

    /// Ids of all stored documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend scroll fails.
    pub async fn document_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .document_fields(DOCUMENT_ID_KEY)
            .await?
            .into_keys()
            .collect())
    }

    /// Stored string `field` of every document, keyed by document id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend scroll fails.
    pub async fn document_fields(&self, field: &str) -> Result<BTreeMap<String, String>> {
        if !self.backend.collection_exists(DOCUMENTS_COLLECTION).await? {
            return Ok(BTreeMap::new());
        }
        let rows = self
            .backend
            .scroll_all(DOCUMENTS_COLLECTION, DOCUMENT_ID_KEY)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, fields)| {
                let value = fields.get(field).cloned().unwrap_or_default();
                (id, value)
            })
            .collect())
    }

    /// Drop both collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for collection in [DOCUMENTS_COLLECTION, CHUNKS_COLLECTION] {
            if self.backend.collection_exists(collection).await? {
                self.backend.delete_collection(collection).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use repomind_store::InMemoryVectorStore;
    use serde_json::json;

    use super::*;
    use crate::embed::{EmbedFuture, HashingEmbedder};
    use crate::error::EmbedError;

    fn store() -> IndexStore {
        IndexStore::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashingEmbedder::new(32)),
        )
    }

    fn doc_meta(id: &str) -> Metadata {
        Metadata::from([(DOCUMENT_ID_KEY.to_owned(), id.into())])
    }

    fn chunk(doc: &str, idx: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id(doc, idx),
            content: text.into(),
            metadata: doc_meta(doc),
            embedding: None,
        }
    }

    #[test]
    fn sanitize_is_total() {
        let meta = Metadata::from([
            ("s".to_owned(), "x".into()),
            ("i".to_owned(), 3i64.into()),
            ("b".to_owned(), true.into()),
            ("f".to_owned(), MetadataValue::Scalar(Scalar::Float(0.5))),
            (
                "seq".to_owned(),
                vec!["a".to_owned(), "b".to_owned()].into(),
            ),
            (
                "map".to_owned(),
                MetadataValue::Mapping(BTreeMap::from([("k".to_owned(), 1i64.into())])),
            ),
            ("none".to_owned(), MetadataValue::Null),
            ("absent".to_owned(), Option::<String>::None.into()),
        ]);
        let payload = sanitize(&meta);
        assert_eq!(payload["s"], json!("x"));
        assert_eq!(payload["i"], json!(3));
        assert_eq!(payload["b"], json!(true));
        assert_eq!(payload["f"], json!(0.5));
        assert_eq!(payload["seq"], json!("a,b"));
        assert_eq!(payload["map"], json!("{\"k\":1}"));
        assert!(!payload.contains_key("none"));
        assert!(!payload.contains_key("absent"));
    }

    #[test]
    fn non_finite_float_becomes_string() {
        let v = sanitize_value(&MetadataValue::Scalar(Scalar::Float(f64::NAN)));
        assert_eq!(v, Some(json!("NaN")));
    }

    #[tokio::test]
    async fn add_and_get_document() {
        let s = store();
        let id = s
            .add_document("a.py", "def foo(): pass", &doc_meta("a.py"), None)
            .await
            .unwrap();
        assert_eq!(id, "a.py");
        let got = s.get_document("a.py").await.unwrap().unwrap();
        assert_eq!(got.content, "def foo(): pass");
        assert_eq!(got.str_field(DOCUMENT_ID_KEY), Some("a.py"));
        assert!(s.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_before_any_write_is_empty() {
        let s = store();
        assert!(s.search_chunks(vec![1.0; 32], 5, None).await.unwrap().is_empty());
        assert!(s.search_documents(vec![1.0; 32], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let s = store();
        s.add_document("a.py", "a", &doc_meta("a.py"), None).await.unwrap();
        s.add_document("b.py", "b", &doc_meta("b.py"), None).await.unwrap();
        s.add_chunks(vec![
            chunk("a.py", 0, "alpha one"),
            chunk("a.py", 1, "alpha two"),
            chunk("b.py", 0, "beta"),
        ])
        .await
        .unwrap();

        let removed = s.delete_document("a.py").await.unwrap();
        assert_eq!(removed, 2);
        assert!(s.get_document("a.py").await.unwrap().is_none());

        let left = s.search_chunks(vec![1.0; 32], 10, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "b.py::0");
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let s = store();
        for _ in 0..2 {
            let n = s
                .replace_document(
                    "a.py",
                    "content",
                    &doc_meta("a.py"),
                    None,
                    vec![chunk("a.py", 0, "one"), chunk("a.py", 1, "two")],
                )
                .await
                .unwrap();
            assert_eq!(n, 2);
        }
        // A shrinking chunk set leaves no stale tail behind.
        s.replace_document(
            "a.py",
            "content",
            &doc_meta("a.py"),
            None,
            vec![chunk("a.py", 0, "one")],
        )
        .await
        .unwrap();

        assert_eq!(s.document_ids().await.unwrap(), vec!["a.py"]);
        let chunks = s.search_chunks(vec![1.0; 32], 10, None).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn filtered_chunk_search() {
        let s = store();
        s.add_chunks(vec![chunk("a.py", 0, "x y"), chunk("b.py", 0, "x y")])
            .await
            .unwrap();
        let hits = s
            .search_chunks(
                vec![1.0; 32],
                10,
                Some(VectorFilter::text_eq(DOCUMENT_ID_KEY, "b.py")),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b.py::0");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let s = store();
        let mut a = chunk("a.py", 0, "x");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = chunk("a.py", 1, "y");
        b.embedding = Some(vec![1.0]);
        assert!(matches!(
            s.add_chunks(vec![a, b]).await,
            Err(IndexError::Other(_))
        ));
    }

    #[tokio::test]
    async fn switching_embedder_dimension_is_a_storage_error() {
        let backend: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let narrow = IndexStore::new(Arc::clone(&backend), Arc::new(HashingEmbedder::new(16)));
        narrow
            .add_document("a.py", "x = 1", &doc_meta("a.py"), None)
            .await
            .unwrap();

        let wide = IndexStore::new(backend, Arc::new(HashingEmbedder::new(32)));
        let err = wide
            .add_document("b.py", "y = 2", &doc_meta("b.py"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Storage(repomind_store::VectorStoreError::Dimension { .. })
        ));
        assert!(wide.search_documents(vec![1.0; 32], 5, None).await.is_err());
    }

    #[tokio::test]
    async fn embedding_failure_surfaces() {
        let failing = |_: &str| -> EmbedFuture {
            Box::pin(async { Err(EmbedError("offline".into())) })
        };
        let s = IndexStore::new(Arc::new(InMemoryVectorStore::new()), Arc::new(failing));
        let err = s
            .add_document("a.py", "x", &Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let s = store();
        s.add_document("a.py", "a", &doc_meta("a.py"), None).await.unwrap();
        s.add_chunks(vec![chunk("a.py", 0, "x")]).await.unwrap();
        s.clear().await.unwrap();
        assert!(s.document_ids().await.unwrap().is_empty());
        assert!(s.search_chunks(vec![1.0; 32], 10, None).await.unwrap().is_empty());
    }
}
