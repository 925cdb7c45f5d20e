//! Embedding producer seam.

use std::future::Future;
use std::pin::Pin;

use crate::error::EmbedError;

/// Boxed future returned by an embedding producer.
pub type EmbedFuture = Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbedError>> + Send>>;

/// Turns text into a vector. Implementations are opaque to the index.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> EmbedFuture;
}

impl<F> Embedder for F
where
    F: Fn(&str) -> EmbedFuture + Send + Sync,
{
    fn embed(&self, text: &str) -> EmbedFuture {
        self(text)
    }
}

/// Local embedder hashing identifier-like tokens into a fixed number of
/// buckets. Needs no model; similar vocabulary gives similar vectors.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous form of [`Embedder::embed`].
    #[must_use]
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            #[allow(clippy::cast_possible_truncation)]
            let idx = (bucket % self.dimensions as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> EmbedFuture {
        let v = self.vector(text);
        Box::pin(async move { Ok(v) })
    }
}

/// Lowercased word pieces; `camelCase` and `snake_case` identifiers are split.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in word.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out.retain(|t| t.len() > 1);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn tokens_split_identifiers() {
        assert_eq!(
            tokens("parseHTTPRequest snake_case x"),
            vec!["parse", "httprequest", "snake", "case"]
        );
    }

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.vector("fn load_config(path: &Path)");
        assert_eq!(a.len(), 64);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(a, e.vector("fn load_config(path: &Path)"));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(8).vector("");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let e = HashingEmbedder::default();
        let q = e.vector("parse configuration file");
        let near = e.vector("fn parse_configuration(file: &str)");
        let far = e.vector("render triangle mesh shader");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[tokio::test]
    async fn closures_are_embedders() {
        let f = |_: &str| -> EmbedFuture { Box::pin(async { Ok(vec![1.0, 2.0]) }) };
        assert_eq!(f.embed("x").await.unwrap(), vec![1.0, 2.0]);
    }
}
