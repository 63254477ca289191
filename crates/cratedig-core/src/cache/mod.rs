//! Two-layer cache and its coordinator.
//!
//! L1 ([`records::ExecutionRecordStore`]) answers "has this item already been
//! completed with its current on-disk state". L2 ([`response::ResponseCache`])
//! answers "has this exact request already been answered". The coordinator
//! routes lookups, tallies hits per layer, and owns the shutdown flush.

pub mod key;
pub mod records;
pub mod response;

use crate::model::{CacheStats, CallParams, Fingerprint};
use records::ExecutionRecordStore;
use response::ResponseCache;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct CacheCoordinator {
    records: ExecutionRecordStore,
    responses: ResponseCache,
    l1_hits: AtomicU64,
    l1_lookups: AtomicU64,
    l2_hits: AtomicU64,
    l2_lookups: AtomicU64,
}

impl CacheCoordinator {
    pub fn new(records: ExecutionRecordStore, responses: ResponseCache) -> Self {
        Self {
            records,
            responses,
            l1_hits: AtomicU64::new(0),
            l1_lookups: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            l2_lookups: AtomicU64::new(0),
        }
    }

    /// L1 check. A store failure degrades to "not completed": reprocessing is
    /// always safe, a false hit is not.
    pub fn is_completed(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.l1_lookups.fetch_add(1, Ordering::Relaxed);
        match self.records.is_completed(path, fingerprint) {
            Ok(true) => {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "execution record lookup failed");
                false
            }
        }
    }

    /// Stored result for a current L1 record, if any was kept.
    pub fn completed_result(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Value> {
        match self.records.completed_result(path, fingerprint) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "stored result unreadable");
                None
            }
        }
    }

    /// Record an item's completion in L1. Write failures are logged, not
    /// fatal: the item will simply be reprocessed next run.
    pub fn record_completion(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        success: bool,
        result: Option<&Value>,
    ) {
        if let Err(e) = self.records.record(path, fingerprint, success, result) {
            tracing::warn!(path = %path.display(), error = %e, "failed to record completion");
        }
    }

    /// L2 lookup by request shape.
    pub fn response(&self, model: &str, prompt: &str, params: &CallParams) -> Option<Value> {
        self.l2_lookups.fetch_add(1, Ordering::Relaxed);
        let hit = self.responses.get(&key::response_key(model, prompt, params));
        if hit.is_some() {
            self.l2_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// L2 write-through after a validated success.
    pub fn store_response(&self, model: &str, prompt: &str, params: &CallParams, payload: Value) {
        self.responses
            .put(&key::response_key(model, prompt, params), payload, model);
    }

    /// Age-based cleanup of both layers. Returns (l1 removed, l2 removed).
    pub fn sweep(&self, max_age_days: u32) -> (usize, usize) {
        let l1 = match self.records.retention_sweep(max_age_days) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "execution record sweep failed");
                0
            }
        };
        let l2 = self.responses.sweep_expired();
        (l1, l2)
    }

    /// Persist everything that is only in memory. Called before shutdown.
    pub fn flush(&self) {
        if let Err(e) = self.responses.flush() {
            tracing::warn!(error = %e, "failed to flush response cache");
        }
    }

    pub fn statistics(&self) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_lookups = self.l1_lookups.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l2_lookups = self.l2_lookups.load(Ordering::Relaxed);
        let rate = |hits: u64, lookups: u64| {
            if lookups > 0 {
                (hits as f64 / lookups as f64 * 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            }
        };
        CacheStats {
            l1_hits,
            l1_lookups,
            l2_hits,
            l2_lookups,
            total_lookups: l1_lookups + l2_lookups,
            l1_hit_rate_percent: rate(l1_hits, l1_lookups),
            l2_hit_rate_percent: rate(l2_hits, l2_lookups),
        }
    }
}
