//! Query cache facade
//!
//! Owns one [`CacheStore`] together with the planner, merger, signature
//! function and telemetry hooks. Hosts create one instance per datasource
//! session and share it by `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::merger::ResponseMerger;
use super::planner::{default_signature, CachePlan, PlanMetadata, RequestPlanner, SignatureFn};
use super::store::CacheStore;
use crate::config::QueryCacheConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::telemetry::{CacheMetrics, NoopObserver, TransferObserver};
use crate::types::{QueryRequest, Target, TargetIdentity};

/// Executes a (possibly narrowed) request against the backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch all frames for `request`
    async fn fetch(&self, request: &QueryRequest) -> Result<Vec<Frame>>;
}

/// Point-in-time view of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Cached target slots
    pub entries: usize,
    /// Rows held across all slots
    pub rows: usize,
}

/// Builder for a [`QueryCache`]
pub struct QueryCacheBuilder {
    config: QueryCacheConfig,
    signature_fn: Option<Box<SignatureFn>>,
    observer: Option<Arc<dyn TransferObserver>>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl QueryCacheBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: QueryCacheConfig::default(),
            signature_fn: None,
            observer: None,
            metrics: None,
        }
    }

    /// Set configuration
    pub fn with_config(mut self, config: QueryCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the target signature function
    pub fn with_signature_fn<F>(mut self, signature_fn: F) -> Self
    where
        F: Fn(&QueryRequest, &Target) -> Result<String> + Send + Sync + 'static,
    {
        self.signature_fn = Some(Box::new(signature_fn));
        self
    }

    /// Set the transfer observer
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: TransferObserver + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Share an existing metrics instance
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the cache
    pub fn build(self) -> Result<QueryCache> {
        let overlap_window_ms = self.config.overlap_window_ms()?;

        Ok(QueryCache {
            store: Mutex::new(CacheStore::new()),
            planner: RequestPlanner::new(overlap_window_ms),
            merger: ResponseMerger::new(),
            signature_fn: self
                .signature_fn
                .unwrap_or_else(|| Box::new(default_signature) as Box<SignatureFn>),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            metrics: self.metrics.unwrap_or_default(),
            in_flight: Mutex::new(HashMap::new()),
            config: self.config,
        })
    }
}

impl Default for QueryCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental result cache for now-relative queries
pub struct QueryCache {
    store: Mutex<CacheStore>,
    planner: RequestPlanner,
    merger: ResponseMerger,
    signature_fn: Box<SignatureFn>,
    observer: Arc<dyn TransferObserver>,
    metrics: Arc<CacheMetrics>,
    in_flight: Mutex<HashMap<TargetIdentity, Arc<AsyncMutex<()>>>>,
    config: QueryCacheConfig,
}

impl QueryCache {
    /// Create a cache with the default signature function and no observer
    pub fn new(config: QueryCacheConfig) -> Result<Self> {
        QueryCacheBuilder::new().with_config(config).build()
    }

    /// Create a builder
    pub fn builder() -> QueryCacheBuilder {
        QueryCacheBuilder::new()
    }

    /// Configuration in use
    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Entry and row counts
    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        CacheStats {
            entries: store.len(),
            rows: store.total_rows(),
        }
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.store.lock().clear();
    }

    /// Decide how to execute `request`
    ///
    /// Callers using `plan`/`merge` directly must not have two fetches for
    /// the same target in flight; [`QueryCache::execute`] enforces that.
    pub fn plan(&self, request: &QueryRequest) -> Result<CachePlan> {
        let plan = if self.config.enabled {
            let mut store = self.store.lock();
            self.planner
                .plan(request, &mut store, &*self.signature_fn)?
        } else {
            CachePlan::bypass(request)
        };

        self.metrics.record_plan(plan.kind, plan.invalidated);
        Ok(plan)
    }

    /// Merge the frames fetched for a plan into the cache
    ///
    /// `original` is the request passed to [`QueryCache::plan`], not the
    /// narrowed one. Must not be called for cancelled or failed fetches.
    pub fn merge(
        &self,
        original: &QueryRequest,
        metadata: &PlanMetadata,
        raw_frames: Vec<Frame>,
    ) -> Result<Vec<Frame>> {
        let outcome = {
            let mut store = self.store.lock();
            self.merger.merge(original, metadata, raw_frames, &mut store)
        };

        match outcome {
            Ok(outcome) => {
                self.metrics.record_merge(&outcome.stats);
                tracing::debug!(
                    request_id = %original.request_id,
                    rows_fetched = outcome.stats.rows_fetched,
                    rows_returned = outcome.stats.rows_returned,
                    evicted = outcome.stats.frames_evicted,
                    "Merged response"
                );
                Ok(outcome.frames)
            }
            Err(e) => {
                if matches!(e, Error::ShapeMismatch { .. }) {
                    self.metrics.record_shape_error();
                }
                Err(e)
            }
        }
    }

    /// Plan, fetch through `transport`, and merge
    ///
    /// Holds a per-target lock from planning until the merge completes, so
    /// overlapping refreshes of the same target run one after the other.
    /// Dropping the returned future before the fetch resolves skips the
    /// merge, so the next attempt plans from the same `prev_to`.
    pub async fn execute<T>(&self, request: &QueryRequest, transport: &T) -> Result<Vec<Frame>>
    where
        T: Transport + ?Sized,
    {
        let _locks = self.lock_targets(request).await;

        let plan = self.plan(request)?;
        let raw_frames = transport.fetch(plan.request()).await?;
        self.observe_transfer(request, &raw_frames);

        self.merge(request, &plan.metadata, raw_frames)
    }

    fn observe_transfer(&self, request: &QueryRequest, frames: &[Frame]) {
        let mut sizes: Vec<(TargetIdentity, usize)> = Vec::new();
        for frame in frames {
            let identity = request.target_identity(&frame.ref_id);
            let size = frame.estimated_size_bytes();
            match sizes.iter_mut().find(|(id, _)| *id == identity) {
                Some((_, total)) => *total += size,
                None => sizes.push((identity, size)),
            }
        }

        for (identity, size) in sizes {
            self.metrics.record_transfer(size);
            self.observer
                .on_transfer_observed(&request.request_id, &identity, size);
        }
    }

    async fn lock_targets(&self, request: &QueryRequest) -> TargetLocks<'_> {
        let mut locks = TargetLocks {
            cache: self,
            guards: Vec::new(),
        };
        if !self.config.enabled || !request.raw_range.is_now_relative() {
            return locks;
        }

        let mut identities: Vec<TargetIdentity> = request
            .targets
            .iter()
            .map(|t| request.target_identity(&t.ref_id))
            .collect();
        // sorted acquisition keeps concurrent multi-target requests deadlock free
        identities.sort();
        identities.dedup();

        for identity in identities {
            let lock = self
                .in_flight
                .lock()
                .entry(identity)
                .or_default()
                .clone();
            locks.guards.push(lock.lock_owned().await);
        }
        locks
    }
}

/// Per-target locks held for the duration of one `execute`
struct TargetLocks<'a> {
    cache: &'a QueryCache,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for TargetLocks<'_> {
    fn drop(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        self.guards.clear();
        // only the table still references idle locks
        self.cache
            .in_flight
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
