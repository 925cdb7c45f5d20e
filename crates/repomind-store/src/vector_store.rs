use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("get error: {0}")]
    Get(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collection {collection} holds {expected}-dimensional vectors, got {actual}")]
    Dimension {
        collection: String,
        expected: u64,
        actual: u64,
    },
}

/// Payload values are restricted to JSON scalars by the callers of this crate.
pub type Payload = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    /// Filter requiring `field` to equal the given text value.
    #[must_use]
    pub fn text_eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                field: field.into(),
                value: FieldValue::Text(value.into()),
            }],
            must_not: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Point id → string-valued payload fields, keyed by the requested field.
pub type ScrollResult = HashMap<String, HashMap<String, String>>;

/// A keyed collection of vectors with scalar payloads.
///
/// Writes to the same id overwrite (last writer wins); writes to different ids
/// need no coordination.
pub trait VectorStore: Send + Sync {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Fetch points by id. Missing ids are skipped.
    fn get(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>>;

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Delete every point whose payload matches `filter`. Returns the number removed.
    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn scroll_all(
        &self,
        collection: &str,
        key_field: &str,
    ) -> BoxFuture<'_, Result<ScrollResult, VectorStoreError>>;
}

/// Reject any vector whose length differs from the collection's size.
pub(crate) fn check_dimensions<'a>(
    collection: &str,
    expected: u64,
    vectors: impl IntoIterator<Item = &'a [f32]>,
) -> Result<(), VectorStoreError> {
    for v in vectors {
        let actual = v.len() as u64;
        if actual != expected {
            return Err(VectorStoreError::Dimension {
                collection: collection.to_owned(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub(crate) fn matches_filter(payload: &Payload, filter: &VectorFilter) -> bool {
    for cond in &filter.must {
        let Some(val) = payload.get(&cond.field) else {
            return false;
        };
        if !field_matches(val, &cond.value) {
            return false;
        }
    }
    for cond in &filter.must_not {
        if let Some(val) = payload.get(&cond.field)
            && field_matches(val, &cond.value)
        {
            return false;
        }
    }
    true
}

fn field_matches(val: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Integer(i) => val.as_i64() == Some(*i),
        FieldValue::Text(s) => val.as_str() == Some(s.as_str()),
        FieldValue::Bool(b) => val.as_bool() == Some(*b),
    }
}

/// Score descending, then id ascending, so equal scores rank the same way every time.
pub(crate) fn rank(scored: &mut [ScoredVectorPoint]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Payload fields that hold strings, keyed by the value of `key_field`.
pub(crate) fn scroll_entry(
    payload: &Payload,
    key_field: &str,
) -> Option<(String, HashMap<String, String>)> {
    let key_val = payload.get(key_field).and_then(|v| v.as_str())?;
    let fields = payload
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
        .collect();
    Some((key_val.to_owned(), fields))
}
