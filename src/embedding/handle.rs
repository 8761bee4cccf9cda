//! Async job handles for the embedding service's background surface
//! (`get_embeddings_async`, `precompute_async`, ...).
//!
//! Per SPEC_FULL.md §9 REDESIGN FLAGS, this replaces the source's
//! `ThreadPoolExecutor` + tracked `Future` list with a `(cancel, await, poll)`
//! triple backed by a `tokio::task::JoinHandle` and a cooperative
//! `Arc<AtomicBool>` cancel flag — no Future objects are tracked by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// A cooperative cancel flag shared between the handle and the spawned task.
/// The task must poll this at safe points; cancellation is never forced.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A handle over a background embedding task. `T` is the task's success
/// value (e.g. `Vec<Vec<f32>>` for a batch).
pub struct JobHandle<T> {
    join: JoinHandle<T>,
    cancel: CancelToken,
    kind: &'static str,
}

impl<T> JobHandle<T>
where
    T: Send + 'static,
{
    pub fn spawn<F, Fut>(kind: &'static str, task: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let join = tokio::spawn(task(cancel.clone()));
        Self { join, cancel, kind }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Cooperative cancel: does not forcibly abort the task, only flips the
    /// shared flag. The spawned future is responsible for checking it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn poll_state(&self) -> HandleState {
        if !self.join.is_finished() {
            if self.cancel.is_cancelled() {
                HandleState::Cancelled
            } else {
                HandleState::Running
            }
        } else {
            HandleState::Completed
        }
    }

    pub async fn join(self) -> Result<T, tokio::task::JoinError> {
        self.join.await
    }
}

/// Lifetime counters by task kind, per SPEC_FULL.md §4.C.
#[derive(Debug, Default)]
pub struct HandleCounters {
    pub single: std::sync::atomic::AtomicU64,
    pub batch: std::sync::atomic::AtomicU64,
    pub precompute: std::sync::atomic::AtomicU64,
}

impl HandleCounters {
    pub fn record(&self, kind: &str) {
        let counter = match kind {
            "single" => &self.single,
            "batch" => &self.batch,
            "precompute" => &self.precompute,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn handle_reports_completed_after_join() {
        let handle = JobHandle::spawn("single", |_cancel| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            42
        });
        let result = handle.join().await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn cancel_flips_cooperative_flag() {
        let handle = JobHandle::spawn("single", |cancel| async move {
            while !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            "cancelled"
        });
        handle.cancel();
        let result = handle.join().await.unwrap();
        assert_eq!(result, "cancelled");
    }
}
