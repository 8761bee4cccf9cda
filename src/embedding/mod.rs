//! 4.C — embedding service: batches, deduplicates (via the cache), retries,
//! and fans out remote embedding calls with bounded concurrency.

pub mod handle;
pub mod provider;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::cache::embedding_cache::{EmbeddingCache, Vector};
use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};
use provider::EmbeddingProvider;

/// Bounds the dynamic-batch-size history per SPEC_FULL.md §4.C ("~100
/// recent observations").
const THROUGHPUT_HISTORY_CAP: usize = 100;

struct DynamicBatchSize {
    current: AtomicUsize,
    max: usize,
    min: usize,
    history: Mutex<VecDeque<f64>>, // items/sec observations
    target_throughput: f64,
}

impl DynamicBatchSize {
    fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(max),
            max,
            min: (max / 8).max(1),
            history: Mutex::new(VecDeque::with_capacity(THROUGHPUT_HISTORY_CAP)),
            target_throughput: 1.0,
        }
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn on_failure(&self) {
        let cur = self.current();
        let next = (cur / 2).max(self.min);
        self.current.store(next, Ordering::Relaxed);
    }

    fn on_success(&self, batch_len: usize, elapsed: Duration) {
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            batch_len as f64 / elapsed.as_secs_f64()
        } else {
            f64::INFINITY
        };

        let mut history = self.history.lock();
        if history.len() >= THROUGHPUT_HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(throughput);

        let avg: f64 = history.iter().sum::<f64>() / history.len() as f64;
        if avg > self.target_throughput {
            let cur = self.current();
            let next = (cur + (cur / 10).max(1)).min(self.max);
            self.current.store(next, Ordering::Relaxed);
        }
    }
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    cfg: EmbeddingConfig,
    batch_size: DynamicBatchSize,
    concurrency: Arc<Semaphore>,
    counters: Arc<handle::HandleCounters>,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<EmbeddingCache>, cfg: EmbeddingConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
        let batch_size = DynamicBatchSize::new(cfg.batch_size.max(1));
        Self {
            provider,
            cache,
            cfg,
            batch_size,
            concurrency,
            counters: Arc::new(handle::HandleCounters::default()),
        }
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Runs the full batch pipeline from SPEC_FULL.md §4.C steps 1-6.
    pub async fn get_embeddings(&self, texts: &[String]) -> EngineResult<Vec<Vector>> {
        let trimmed: Vec<Option<String>> = texts
            .iter()
            .map(|t| {
                let t = t.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            })
            .collect();

        let mut results: Vec<Option<Vector>> = vec![None; texts.len()];
        let mut to_fetch_text = Vec::new();
        let mut first_seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        let mut indices_by_fetch: Vec<Vec<usize>> = Vec::new();

        for (i, text) in trimmed.iter().enumerate() {
            match text {
                None => {}
                Some(t) => {
                    if let Some(v) = self.cache.get(t, self.model()) {
                        results[i] = Some(v);
                    } else if let Some(&fetch_idx) = first_seen.get(t.as_str()) {
                        indices_by_fetch[fetch_idx].push(i);
                    } else {
                        first_seen.insert(t.as_str(), to_fetch_text.len());
                        to_fetch_text.push(t.clone());
                        indices_by_fetch.push(vec![i]);
                    }
                }
            }
        }

        if !to_fetch_text.is_empty() {
            let computed = self.compute_with_fanout(&to_fetch_text).await?;
            for (offset, indices) in indices_by_fetch.into_iter().enumerate() {
                let vector = computed[offset].clone();
                self.cache.set(&to_fetch_text[offset], vector.clone(), self.model());
                for idx in indices {
                    results[idx] = Some(vector.clone());
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn compute_with_fanout(&self, texts: &[String]) -> EngineResult<Vec<Vector>> {
        let batch_size = self.batch_size.current().max(1);
        let chunks: Vec<Vec<String>> = texts
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();

        let mut futs = FuturesUnordered::new();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let provider = self.provider.clone();
            let semaphore = self.concurrency.clone();
            let cfg = self.cfg.clone();
            futs.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let start = Instant::now();
                let result = call_with_retry(provider.as_ref(), &chunk, &cfg).await;
                (idx, chunk.len(), start.elapsed(), result)
            });
        }

        let mut ordered: Vec<Option<Vec<Vector>>> = Vec::new();
        while let Some((idx, len, elapsed, result)) = futs.next().await {
            if ordered.len() <= idx {
                ordered.resize(idx + 1, None);
            }
            match result {
                Ok(vectors) => {
                    self.batch_size.on_success(len, elapsed);
                    ordered[idx] = Some(vectors);
                }
                Err(e) => {
                    self.batch_size.on_failure();
                    return Err(e);
                }
            }
        }

        Ok(ordered.into_iter().flatten().flatten().collect())
    }

    pub fn spawn_get_embeddings_async(self: &Arc<Self>, texts: Vec<String>) -> handle::JobHandle<EngineResult<Vec<Vector>>> {
        self.counters.record("batch");
        let service = self.clone();
        handle::JobHandle::spawn("batch", move |cancel| async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Internal {
                    message: "cancelled before start".into(),
                });
            }
            service.get_embeddings(&texts).await
        })
    }

    pub fn spawn_get_single_embedding_async(self: &Arc<Self>, text: String) -> handle::JobHandle<EngineResult<Vector>> {
        self.counters.record("single");
        let service = self.clone();
        handle::JobHandle::spawn("single", move |_cancel| async move {
            let mut vs = service.get_embeddings(&[text]).await?;
            vs.pop().ok_or_else(|| EngineError::Internal {
                message: "empty embedding result for single text".into(),
            })
        })
    }

    /// Precomputes embeddings for many texts, invoking `progress` after each
    /// sub-batch persists, mirroring the source's `precompute_embeddings_async`.
    pub fn spawn_precompute_async<P>(self: &Arc<Self>, texts: Vec<String>, mut progress: P) -> handle::JobHandle<EngineResult<usize>>
    where
        P: FnMut(usize, usize) + Send + 'static,
    {
        self.counters.record("precompute");
        let service = self.clone();
        let batch_size = self.cfg.batch_size.max(1);
        handle::JobHandle::spawn("precompute", move |cancel| async move {
            let total = texts.len();
            let mut done = 0usize;
            for chunk in texts.chunks(batch_size) {
                if cancel.is_cancelled() {
                    break;
                }
                service.get_embeddings(chunk).await?;
                done += chunk.len();
                progress(done, total);
            }
            Ok(done)
        })
    }

    pub fn counters(&self) -> Arc<handle::HandleCounters> {
        self.counters.clone()
    }
}

async fn call_with_retry(
    provider: &dyn EmbeddingProvider,
    chunk: &[String],
    cfg: &EmbeddingConfig,
) -> EngineResult<Vec<Vector>> {
    let mut attempt = 0u32;
    loop {
        match provider.embed_batch(chunk).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < cfg.max_retries => {
                let backoff = cfg.retry_delay_ms * 2u64.saturating_pow(attempt);
                tracing::warn!(attempt, backoff_ms = backoff, error = %e, "embedding provider call failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::MockEmbeddingProvider;

    fn service() -> Arc<EmbeddingService> {
        let cache = Arc::new(EmbeddingCache::new(64, None, None));
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));
        let mut cfg = EmbeddingConfig::default();
        cfg.batch_size = 2;
        cfg.concurrency = 2;
        Arc::new(EmbeddingService::new(provider, cache, cfg))
    }

    /// Records every batch it's asked to embed, so tests can assert on what
    /// actually reached the "remote" provider.
    struct RecordingProvider {
        inner: MockEmbeddingProvider,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingProvider {
        fn new(dimension: usize) -> Self {
            Self {
                inner: MockEmbeddingProvider::new(dimension),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vector>> {
            self.calls.lock().push(texts.to_vec());
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn duplicate_texts_hit_cache_second_time() {
        let svc = service();
        let out = svc.get_embeddings(&["a".into(), "b".into(), "a".into()]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);
    }

    #[tokio::test]
    async fn duplicate_texts_in_one_call_are_deduped_before_fanout() {
        let recording = Arc::new(RecordingProvider::new(8));
        let cache = Arc::new(EmbeddingCache::new(64, None, None));
        let mut cfg = EmbeddingConfig::default();
        cfg.batch_size = 8;
        cfg.concurrency = 2;
        let svc = Arc::new(EmbeddingService::new(recording.clone(), cache, cfg));

        let out = svc.get_embeddings(&["a".into(), "b".into(), "a".into()]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);

        let calls = recording.calls.lock();
        let all_sent: Vec<String> = calls.iter().flatten().cloned().collect();
        assert_eq!(all_sent, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn empty_text_yields_no_slot_but_keeps_others() {
        let svc = service();
        let out = svc.get_embeddings(&["".into(), "x".into()]).await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn second_call_is_served_entirely_from_cache() {
        let svc = service();
        svc.get_embeddings(&["a".into(), "b".into()]).await.unwrap();
        // cache is now warm; this should not panic and should return identical vectors
        let out = svc.get_embeddings(&["b".into(), "a".into()]).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn async_handle_returns_single_embedding() {
        let svc = service();
        let handle = svc.spawn_get_single_embedding_async("hello".into());
        let result = handle.join().await.unwrap().unwrap();
        assert_eq!(result.len(), 8);
    }
}
