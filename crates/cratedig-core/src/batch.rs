//! Bounded-concurrency batch orchestrator.
//!
//! A fixed-size worker pool (Semaphore + JoinSet) draws from the item
//! collection. Each item runs entirely within one worker: L1 check, processor
//! invocation with its own internal retry waits, record write. One item's
//! failure never aborts the batch. Results come back in completion order;
//! callers needing stable output sort by identity afterwards.

use crate::cache::CacheCoordinator;
use crate::errors::ApiError;
use crate::model::{BatchResult, BatchStage, WorkItem};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The injected per-item capability. The orchestrator only needs success or a
/// typed failure; what happens inside (prompting, structured calls) is the
/// processor's business.
#[async_trait]
pub trait ItemProcessor<P>: Send + Sync {
    async fn process(&self, item: &WorkItem<P>) -> Result<Value, ApiError>;
}

pub struct BatchOrchestrator {
    caches: Arc<CacheCoordinator>,
    shutdown: Arc<AtomicBool>,
}

impl BatchOrchestrator {
    pub fn new(caches: Arc<CacheCoordinator>) -> Self {
        Self {
            caches,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for a signal hook: once set, no further items are dispatched;
    /// in-flight items run to completion and the batch returns what it has.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn caches(&self) -> &Arc<CacheCoordinator> {
        &self.caches
    }

    /// Process `items` with at most `concurrency` in flight. Always returns
    /// one `BatchResult` per dispatched item, failures included.
    pub async fn run_batch<P>(
        &self,
        items: Vec<WorkItem<P>>,
        processor: Arc<dyn ItemProcessor<P>>,
        concurrency: usize,
    ) -> Vec<BatchResult>
    where
        P: Send + Sync + 'static,
    {
        let total = items.len();
        let concurrency = concurrency.max(1);
        tracing::info!(total, concurrency, "starting batch");

        let sem = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();
        // Task identity survives a panic only out here; the JoinError itself
        // carries no payload.
        let mut dispatched: HashMap<tokio::task::Id, PathBuf> = HashMap::new();

        for item in items {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::warn!("shutdown requested, not dispatching further items");
                break;
            }
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break, // semaphore closed, nothing more to dispatch
            };
            let caches = self.caches.clone();
            let processor = processor.clone();
            let path = item.path.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                process_one(&caches, processor.as_ref(), &item).await
            });
            dispatched.insert(handle.id(), path);
        }

        let mut results = Vec::with_capacity(total);
        let mut completed = 0usize;
        while let Some(res) = join_set.join_next_with_id().await {
            let result = match res {
                Ok((id, result)) => {
                    dispatched.remove(&id);
                    result
                }
                Err(e) => {
                    let path = dispatched.remove(&e.id()).unwrap_or_default();
                    tracing::error!(path = %path.display(), error = %e, "processing task aborted");
                    BatchResult {
                        path,
                        success: false,
                        payload: None,
                        error: Some(format!("task error: {}", e)),
                        stage: BatchStage::Error,
                        elapsed: Default::default(),
                    }
                }
            };
            completed += 1;
            if completed % 25 == 0 {
                tracing::info!(completed, total, "batch progress");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            completed = results.len(),
            failed,
            "batch finished"
        );
        results
    }
}

async fn process_one<P>(
    caches: &CacheCoordinator,
    processor: &dyn ItemProcessor<P>,
    item: &WorkItem<P>,
) -> BatchResult {
    let started = Instant::now();

    // Hard skip: a current L1 record means zero remote work for this item.
    if caches.is_completed(&item.path, &item.fingerprint) {
        tracing::debug!(path = %item.path.display(), "item already completed, skipping");
        return BatchResult {
            path: item.path.clone(),
            success: true,
            payload: caches.completed_result(&item.path, &item.fingerprint),
            error: None,
            stage: BatchStage::Cached,
            elapsed: started.elapsed(),
        };
    }

    match processor.process(item).await {
        Ok(payload) => {
            caches.record_completion(&item.path, &item.fingerprint, true, Some(&payload));
            BatchResult {
                path: item.path.clone(),
                success: true,
                payload: Some(payload),
                error: None,
                stage: BatchStage::Processed,
                elapsed: started.elapsed(),
            }
        }
        Err(e) => {
            tracing::error!(path = %item.path.display(), error = %e, "item failed");
            caches.record_completion(&item.path, &item.fingerprint, false, None);
            BatchResult {
                path: item.path.clone(),
                success: false,
                payload: None,
                error: Some(e.to_string()),
                stage: BatchStage::Error,
                elapsed: started.elapsed(),
            }
        }
    }
}

/// Stable output order: results arrive in completion order, so callers sort by
/// the item's original identity before rendering or deduplicating.
pub fn sort_by_identity(results: &mut [BatchResult]) {
    results.sort_by(|a, b| a.path.cmp(&b.path));
}

/// Collapse results whose canonical keys are equal; first-seen wins. Results
/// the key function cannot classify (`None`) are kept untouched. Pure
/// post-processing: apply after `sort_by_identity` so "first" is independent
/// of completion interleaving.
pub fn dedup_by_key<F>(results: Vec<BatchResult>, key: F) -> Vec<BatchResult>
where
    F: Fn(&BatchResult) -> Option<String>,
{
    let mut seen = HashSet::new();
    let before = results.len();
    let deduped: Vec<BatchResult> = results
        .into_iter()
        .filter(|r| match key(r) {
            Some(k) => seen.insert(k),
            None => true,
        })
        .collect();
    let dropped = before - deduped.len();
    if dropped > 0 {
        tracing::info!(dropped, "collapsed duplicate results");
    }
    deduped
}
