//! 4.B — embedding cache: specializes [`super::KvCache`] for text→vector,
//! with a model-aware, content-addressed key.
//!
//! Key = `sha256(lowercase(trim(text)) || "|" || model)`, grounded in the
//! source's `EmbeddingCache._compute_text_hash`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::KvCache;

pub type Vector = Vec<f32>;

pub fn cache_key(text: &str, model: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct EmbeddingCache {
    inner: KvCache<Vector>,
    ttl: Option<Duration>,
}

impl EmbeddingCache {
    pub fn new(max_memory_entries: usize, db: Option<sled::Tree>, ttl: Option<Duration>) -> Self {
        Self {
            inner: KvCache::new(max_memory_entries, db, ttl),
            ttl,
        }
    }

    pub fn get(&self, text: &str, model: &str) -> Option<Vector> {
        if text.trim().is_empty() {
            return None;
        }
        self.inner.get(&cache_key(text, model))
    }

    pub fn set(&self, text: &str, vector: Vector, model: &str) {
        if text.trim().is_empty() || vector.is_empty() {
            return;
        }
        self.inner.set(&cache_key(text, model), vector, self.ttl);
    }

    /// Returns results in input order; missing entries are `None`, with
    /// their positions additionally collected into `missing_indices`.
    pub fn get_batch(&self, texts: &[String], model: &str) -> (Vec<Option<Vector>>, Vec<usize>) {
        let mut results = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let v = self.get(text, model);
            if v.is_none() {
                missing.push(i);
            }
            results.push(v);
        }
        (results, missing)
    }

    pub fn set_batch(&self, texts: &[String], vectors: &[Vector], model: &str) -> Result<(), String> {
        if texts.len() != vectors.len() {
            return Err("texts and vectors must have the same length".into());
        }
        for (text, vector) in texts.iter().zip(vectors.iter()) {
            self.set(text, vector.clone(), model);
        }
        Ok(())
    }

    pub fn stats(&self) -> super::CacheStatsSnapshot {
        self.inner.stats()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn sweep_expired(&self) {
        self.inner.sweep_expired();
    }
}

/// Thin, sharable handle used by the embedding service and the HTTP layer.
pub type SharedEmbeddingCache = Arc<EmbeddingCache>;

/// Per-model entry counts, computed from a caller-supplied `(key, model)`
/// index rather than stored redundantly (the cache itself is model-blind at
/// the storage layer, as the key already folds the model in).
#[derive(Debug, Default, serde::Serialize)]
pub struct ModelDistribution(pub HashMap<String, u64>);

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> EmbeddingCache {
        EmbeddingCache::new(16, None, None)
    }

    #[test]
    fn key_is_case_and_whitespace_insensitive() {
        let a = cache_key("  Hello World  ", "m1");
        let b = cache_key("hello world", "m1");
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_by_model() {
        let a = cache_key("hello", "m1");
        let b = cache_key("hello", "m2");
        assert_ne!(a, b);
    }

    #[test]
    fn batch_round_trip_preserves_order() {
        let c = cache();
        let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let vectors = vec![vec![1.0], vec![2.0], vec![1.0]];
        c.set_batch(&texts, &vectors, "m").unwrap();
        let (got, missing) = c.get_batch(&texts, "m");
        assert!(missing.is_empty());
        assert_eq!(got, vec![Some(vec![1.0]), Some(vec![2.0]), Some(vec![1.0])]);
    }

    #[test]
    fn set_batch_rejects_length_mismatch() {
        let c = cache();
        let texts = vec!["a".to_string()];
        let vectors: Vec<Vector> = vec![];
        assert!(c.set_batch(&texts, &vectors, "m").is_err());
    }

    #[test]
    fn missing_indices_reported_in_order() {
        let c = cache();
        c.set("known", vec![9.0], "m");
        let texts = vec!["known".to_string(), "unknown1".to_string(), "unknown2".to_string()];
        let (got, missing) = c.get_batch(&texts, "m");
        assert_eq!(missing, vec![1, 2]);
        assert_eq!(got[0], Some(vec![9.0]));
    }

    #[test]
    fn empty_text_never_cached() {
        let c = cache();
        c.set("   ", vec![1.0], "m");
        assert_eq!(c.get("   ", "m"), None);
    }
}
