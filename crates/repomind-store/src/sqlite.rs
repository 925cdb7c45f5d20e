//! `SQLite`-backed persistent vector collections.
//!
//! Vectors and payloads are stored as JSON text. Search loads the collection
//! and scores it with the same brute-force cosine scan as the in-memory store,
//! which is adequate for single-repository indexes.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::vector_store::{
    BoxFuture, Payload, ScoredVectorPoint, ScrollResult, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError, check_dimensions, cosine_similarity, matches_filter, rank, scroll_entry,
};

#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

type Row = (String, String, String);

impl SqliteVectorStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self, VectorStoreError> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection keeps `:memory:` databases coherent and
        // serializes writers to the same point id.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, VectorStoreError> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| VectorStoreError::Connection(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_rows(&self, collection: &str) -> Result<Vec<Row>, sqlx::Error> {
        sqlx::query_as("SELECT id, vector, payload FROM vector_points WHERE collection = ?")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
    }

    async fn exists(&self, collection: &str) -> Result<bool, sqlx::Error> {
        Ok(self.vector_size(collection).await?.is_some())
    }

    async fn vector_size(&self, collection: &str) -> Result<Option<u64>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT vector_size FROM vector_collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(size,)| u64::try_from(size).unwrap_or(0)))
    }
}

fn decode_payload(raw: &str) -> Result<Payload, VectorStoreError> {
    serde_json::from_str(raw).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn decode_point((id, vector, payload): Row) -> Result<VectorPoint, VectorStoreError> {
    let vector: Vec<f32> =
        serde_json::from_str(&vector).map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    Ok(VectorPoint {
        id,
        vector,
        payload: decode_payload(&payload)?,
    })
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let size = i64::try_from(vector_size)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query("INSERT OR IGNORE INTO vector_collections (name, vector_size) VALUES (?, ?)")
                .bind(&collection)
                .bind(size)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let stored = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            match stored {
                Some(expected) if expected != vector_size => Err(VectorStoreError::Dimension {
                    collection,
                    expected,
                    actual: vector_size,
                }),
                _ => Ok(()),
            }
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            sqlx::query("DELETE FROM vector_collections WHERE name = ?")
                .bind(&collection)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let Some(size) = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?
            else {
                return Err(VectorStoreError::Upsert(format!(
                    "collection {collection} not found"
                )));
            };
            check_dimensions(&collection, size, points.iter().map(|p| p.vector.as_slice()))?;

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            for p in points {
                let vector = serde_json::to_string(&p.vector)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                let payload = serde_json::to_string(&p.payload)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    "INSERT OR REPLACE INTO vector_points (collection, id, vector, payload) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&collection)
                .bind(&p.id)
                .bind(vector)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let Some(size) = self
                .vector_size(&collection)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?
            else {
                return Err(VectorStoreError::Search(format!(
                    "collection {collection} not found"
                )));
            };
            check_dimensions(&collection, size, [vector.as_slice()])?;
            let rows = self
                .load_rows(&collection)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            let filter = filter.unwrap_or_default();
            let mut scored = Vec::with_capacity(rows.len());
            for row in rows {
                let point = decode_point(row)?;
                if !matches_filter(&point.payload, &filter) {
                    continue;
                }
                scored.push(ScoredVectorPoint {
                    score: cosine_similarity(&vector, &point.vector),
                    id: point.id,
                    payload: point.payload,
                });
            }

            rank(&mut scored);
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn get(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut points = Vec::with_capacity(ids.len());
            for id in ids {
                let row: Option<Row> = sqlx::query_as(
                    "SELECT id, vector, payload FROM vector_points WHERE collection = ? AND id = ?",
                )
                .bind(&collection)
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Get(e.to_string()))?;
                if let Some(row) = row {
                    points.push(decode_point(row)?);
                }
            }
            Ok(points)
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            for id in ids {
                sqlx::query("DELETE FROM vector_points WHERE collection = ? AND id = ?")
                    .bind(&collection)
                    .bind(&id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT id, payload FROM vector_points WHERE collection = ?")
                    .bind(&collection)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Delete(e.to_string()))?;

            let mut doomed = Vec::new();
            for (id, payload) in rows {
                if matches_filter(&decode_payload(&payload)?, &filter) {
                    doomed.push(id);
                }
            }
            let count = doomed.len();
            self.delete_by_ids(&collection, doomed).await?;
            Ok(count)
        })
    }

    fn scroll_all(
        &self,
        collection: &str,
        key_field: &str,
    ) -> BoxFuture<'_, Result<ScrollResult, VectorStoreError>> {
        let collection = collection.to_owned();
        let key_field = key_field.to_owned();
        Box::pin(async move {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT payload FROM vector_points WHERE collection = ?")
                    .bind(&collection)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;

            let mut result = ScrollResult::new();
            for (payload,) in rows {
                if let Some((key, fields)) = scroll_entry(&decode_payload(&payload)?, &key_field) {
                    result.insert(key, fields);
                }
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    async fn store() -> SqliteVectorStore {
        SqliteVectorStore::open(":memory:").await.unwrap()
    }

    fn point(id: &str, vector: Vec<f32>, doc: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([
                ("document_id".into(), json!(doc)),
                ("start_line".into(), json!(1)),
            ]),
        }
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = store().await;
        assert!(!store.collection_exists("c").await.unwrap());
        store.ensure_collection("c", 2).await.unwrap();
        store.ensure_collection("c", 2).await.unwrap();
        assert!(store.collection_exists("c").await.unwrap());
        store.delete_collection("c").await.unwrap();
        assert!(!store.collection_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_requires_collection() {
        let store = store().await;
        let err = store
            .upsert("missing", vec![point("a", vec![1.0], "d")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Upsert(_)));
    }

    #[tokio::test]
    async fn upsert_search_and_get_round_trip() {
        let store = store().await;
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![point("a", vec![1.0, 0.0], "x"), point("b", vec![0.0, 1.0], "y")],
            )
            .await
            .unwrap();

        let hits = store.search("c", vec![0.1, 0.9], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].payload["document_id"], json!("y"));
        assert_eq!(hits[0].payload["start_line"], json!(1));

        let got = store
            .get("c", vec!["a".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn delete_by_filter_and_scroll() {
        let store = store().await;
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("x1", vec![1.0, 0.0], "x"),
                    point("x2", vec![1.0, 0.0], "x"),
                    point("y1", vec![0.0, 1.0], "y"),
                ],
            )
            .await
            .unwrap();

        let removed = store
            .delete_by_filter("c", VectorFilter::text_eq("document_id", "x"))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let rest = store.scroll_all("c", "document_id").await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest.contains_key("y"));
    }

    #[tokio::test]
    async fn reopening_with_another_dimension_is_rejected() {
        let store = store().await;
        store.ensure_collection("c", 2).await.unwrap();
        assert!(matches!(
            store.ensure_collection("c", 3).await,
            Err(VectorStoreError::Dimension { expected: 2, actual: 3, .. })
        ));
        assert!(matches!(
            store.upsert("c", vec![point("a", vec![1.0, 0.0, 0.0], "x")]).await,
            Err(VectorStoreError::Dimension { .. })
        ));
        assert!(matches!(
            store.search("c", vec![1.0], 1, None).await,
            Err(VectorStoreError::Dimension { expected: 2, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn deleting_collection_cascades_points() {
        let store = store().await;
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert("c", vec![point("a", vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        store.delete_collection("c").await.unwrap();
        store.ensure_collection("c", 2).await.unwrap();
        assert!(store.get("c", vec!["a".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteVectorStore::open(path).await.unwrap();
            store.ensure_collection("c", 2).await.unwrap();
            store
                .upsert("c", vec![point("a", vec![1.0, 0.0], "x")])
                .await
                .unwrap();
        }
        let reopened = SqliteVectorStore::open(path).await.unwrap();
        assert_eq!(reopened.get("c", vec!["a".into()]).await.unwrap().len(), 1);
    }
}
