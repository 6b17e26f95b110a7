//! Cache telemetry
//!
//! Two pieces, both optional for correctness:
//!
//! - **TransferObserver**: host hook told how many bytes each target's
//!   response carried, used to profile the savings of incremental fetches
//! - **CacheMetrics**: atomic counters over plans and merges, exported in
//!   Prometheus format by [`PrometheusExporter`]
//!
//! # Example
//!
//! ```rust,ignore
//! use incremental_query_cache::telemetry::{CacheMetrics, PrometheusConfig, PrometheusExporter};
//!
//! let metrics = Arc::new(CacheMetrics::new());
//! let exporter = PrometheusExporter::new(PrometheusConfig::default(), metrics.clone());
//! println!("{}", exporter.export());
//! ```

pub mod prometheus_exporter;

pub use prometheus_exporter::{PrometheusConfig, PrometheusExporter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::cache::{MergeStats, PlanKind};
use crate::types::TargetIdentity;

// ============================================================================
// Transfer observation
// ============================================================================

/// Receives the size of each target's transferred response
pub trait TransferObserver: Send + Sync {
    /// Called once per target that received frames in a response
    fn on_transfer_observed(&self, request_id: &str, target: &TargetIdentity, byte_size: usize);
}

/// Observer that ignores every observation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_transfer_observed(&self, _request_id: &str, _target: &TargetIdentity, _byte_size: usize) {
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Atomic counters over the cache's lifetime
#[derive(Debug)]
pub struct CacheMetrics {
    plans_total: AtomicU64,
    plans_partial: AtomicU64,
    plans_full: AtomicU64,
    plans_bypassed: AtomicU64,
    invalidations: AtomicU64,
    merges: AtomicU64,
    frames_appended: AtomicU64,
    frames_amended: AtomicU64,
    frames_evicted: AtomicU64,
    rows_fetched: AtomicU64,
    rows_returned: AtomicU64,
    bytes_transferred: AtomicU64,
    shape_errors: AtomicU64,
    started: Instant,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            plans_total: AtomicU64::new(0),
            plans_partial: AtomicU64::new(0),
            plans_full: AtomicU64::new(0),
            plans_bypassed: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            merges: AtomicU64::new(0),
            frames_appended: AtomicU64::new(0),
            frames_amended: AtomicU64::new(0),
            frames_evicted: AtomicU64::new(0),
            rows_fetched: AtomicU64::new(0),
            rows_returned: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            shape_errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record a planning decision
    pub fn record_plan(&self, kind: PlanKind, invalidated: usize) {
        self.plans_total.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            PlanKind::Partial => &self.plans_partial,
            PlanKind::Full => &self.plans_full,
            PlanKind::Bypass => &self.plans_bypassed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.invalidations
            .fetch_add(invalidated as u64, Ordering::Relaxed);
    }

    /// Record a completed merge
    pub fn record_merge(&self, stats: &MergeStats) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        self.frames_appended
            .fetch_add(stats.frames_appended, Ordering::Relaxed);
        self.frames_amended
            .fetch_add(stats.frames_amended, Ordering::Relaxed);
        self.frames_evicted
            .fetch_add(stats.frames_evicted, Ordering::Relaxed);
        self.rows_fetched
            .fetch_add(stats.rows_fetched, Ordering::Relaxed);
        self.rows_returned
            .fetch_add(stats.rows_returned, Ordering::Relaxed);
    }

    /// Record bytes reported for a transfer
    pub fn record_transfer(&self, byte_size: usize) {
        self.bytes_transferred
            .fetch_add(byte_size as u64, Ordering::Relaxed);
    }

    /// Record a merge rejected for mismatched frame shapes
    pub fn record_shape_error(&self) {
        self.shape_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            plans_total: self.plans_total.load(Ordering::Relaxed),
            plans_partial: self.plans_partial.load(Ordering::Relaxed),
            plans_full: self.plans_full.load(Ordering::Relaxed),
            plans_bypassed: self.plans_bypassed.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            frames_appended: self.frames_appended.load(Ordering::Relaxed),
            frames_amended: self.frames_amended.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            shape_errors: self.shape_errors.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Non-atomic snapshot of cache metrics for serialization
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    /// Requests planned
    pub plans_total: u64,
    /// Requests narrowed to a delta
    pub plans_partial: u64,
    /// Cache-eligible requests fetched in full
    pub plans_full: u64,
    /// Requests not eligible for caching
    pub plans_bypassed: u64,
    /// Entries dropped by the planner
    pub invalidations: u64,
    /// Merges completed
    pub merges: u64,
    /// New series added to the cache
    pub frames_appended: u64,
    /// Series amended with fresh rows
    pub frames_amended: u64,
    /// Series evicted after trimming
    pub frames_evicted: u64,
    /// Rows received from the transport
    pub rows_fetched: u64,
    /// Rows returned to callers
    pub rows_returned: u64,
    /// Bytes reported to the transfer observer
    pub bytes_transferred: u64,
    /// Merges rejected for shape mismatch
    pub shape_errors: u64,
    /// Seconds since the counters were created
    pub uptime_secs: u64,
}

impl CacheMetricsSnapshot {
    /// Share of cache-eligible requests served incrementally (0.0-1.0)
    pub fn partial_ratio(&self) -> f64 {
        let eligible = self.plans_partial + self.plans_full;
        if eligible == 0 {
            0.0
        } else {
            self.plans_partial as f64 / eligible as f64
        }
    }

    /// Share of returned rows that came from the cache (0.0-1.0)
    pub fn cached_row_ratio(&self) -> f64 {
        if self.rows_returned == 0 {
            0.0
        } else {
            self.rows_returned.saturating_sub(self.rows_fetched) as f64 / self.rows_returned as f64
        }
    }
}
