//! Vector collection backends for repomind.
//!
//! The index layer talks to storage only through [`VectorStore`]; this crate
//! ships a process-local backend and a persistent `SQLite` backend.

pub mod in_memory_store;
pub mod sqlite;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;
pub use vector_store::{
    BoxFuture, FieldCondition, FieldValue, Payload, ScoredVectorPoint, ScrollResult, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError,
};
