//! Error types for repomind-index.

use std::num::TryFromIntError;

/// Failure reported by an embedding producer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EmbedError(pub String);

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend write or query failure.
    #[error("storage error: {0}")]
    Storage(#[from] repomind_store::VectorStoreError),

    /// Embedding producer failure during indexing.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Retrieval failed; never replaced by an empty result.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Configuration could not be read or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_the_matching_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(IndexError::from(io), IndexError::Io(_)));

        let embed = IndexError::from(EmbedError("model offline".into()));
        assert!(matches!(embed, IndexError::Embedding(_)));
        assert_eq!(embed.to_string(), "embedding failed: model offline");

        let overflow = u8::try_from(300_u32).unwrap_err();
        assert!(matches!(IndexError::from(overflow), IndexError::IntConversion(_)));
    }

    #[test]
    fn retrieval_message_is_kept() {
        let err = IndexError::Retrieval("query embedding failed".into());
        assert_eq!(err.to_string(), "retrieval failed: query embedding failed");
    }
}
