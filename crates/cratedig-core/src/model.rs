//! Core row types shared across the call layer, the caches, and the batch
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mtime drift below this is treated as "unchanged". Filesystems round mtimes
/// differently (FAT stores 2s granularity, some NFS servers truncate), so an
/// exact float comparison would invalidate records that are in fact current.
pub const MTIME_TOLERANCE_SECS: f64 = 1.0;

/// Cheap proxy for "has the underlying data changed": size plus modification
/// time. A stored record is only a valid hit when both still match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time as seconds since the unix epoch.
    pub mtime_secs: f64,
}

impl Fingerprint {
    /// Read the current fingerprint of a path. Works for directories too: a
    /// directory's mtime changes when entries are added or removed, which is
    /// exactly the staleness signal an album directory needs.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime_secs = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Self {
            size: meta.len(),
            mtime_secs,
        })
    }

    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.size == other.size && (self.mtime_secs - other.mtime_secs).abs() < MTIME_TOLERANCE_SECS
    }
}

/// One unit of batch processing. Identity is the path; `payload` is whatever
/// domain data the injected processor needs. Immutable once constructed for a
/// given run.
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub payload: P,
}

/// The subset of call options that change the model's output and therefore
/// belong in the response cache key. Cosmetic or transport-level options
/// (timeouts, connection settings) never fragment the cache because they are
/// simply not part of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1000,
        }
    }
}

impl CallParams {
    /// Stable textual form folded into the cache key digest.
    pub fn fingerprint(&self) -> String {
        format!("temperature={:.4};max_tokens={}", self.temperature, self.max_tokens)
    }
}

/// Which stage an item reached. `Cached` means the L1 store answered and the
/// processor was never invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Cached,
    Processed,
    Error,
}

impl BatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Cached => "cached",
            BatchStage::Processed => "processed",
            BatchStage::Error => "error",
        }
    }
}

/// Per-item outcome of a batch run. The collection for a run has no ordering
/// guarantee relative to input order; callers needing stable output sort by
/// `path` first.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub path: PathBuf,
    pub success: bool,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub stage: BatchStage,
    #[serde(serialize_with = "ser_duration_secs")]
    pub elapsed: Duration,
}

fn ser_duration_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Snapshot of the call client's running counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retried_calls: u64,
    pub success_rate_percent: f64,
}

/// Combined L1/L2 statistics from the cache coordinator. Each layer's hit
/// rate is over that layer's own lookups, so one layer's traffic never
/// dilutes the other's rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_lookups: u64,
    pub l2_hits: u64,
    pub l2_lookups: u64,
    pub total_lookups: u64,
    pub l1_hit_rate_percent: f64,
    pub l2_hit_rate_percent: f64,
}

pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tolerates_sub_second_mtime_drift() {
        let a = Fingerprint {
            size: 4096,
            mtime_secs: 1_700_000_000.0,
        };
        let b = Fingerprint {
            size: 4096,
            mtime_secs: 1_700_000_000.6,
        };
        assert!(a.matches(&b));
    }

    #[test]
    fn fingerprint_rejects_size_or_mtime_change() {
        let a = Fingerprint {
            size: 4096,
            mtime_secs: 1_700_000_000.0,
        };
        let grew = Fingerprint {
            size: 8192,
            mtime_secs: 1_700_000_000.0,
        };
        let touched = Fingerprint {
            size: 4096,
            mtime_secs: 1_700_000_002.0,
        };
        assert!(!a.matches(&grew));
        assert!(!a.matches(&touched));
    }

    #[test]
    fn call_params_fingerprint_is_stable_and_discriminating() {
        let a = CallParams {
            temperature: 0.0,
            max_tokens: 1000,
        };
        assert_eq!(a.fingerprint(), a.fingerprint());
        let warmer = CallParams {
            temperature: 0.7,
            ..a
        };
        assert_ne!(a.fingerprint(), warmer.fingerprint());
    }
}
