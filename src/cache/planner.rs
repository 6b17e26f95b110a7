//! Request planning: decide between a full and a narrowed fetch

use std::collections::HashMap;

use super::store::CacheStore;
use crate::error::{Error, Result};
use crate::types::{QueryRequest, Target, TargetIdentity, TimeRange, Timestamp};

/// Computes the content signature of a target
///
/// Must be deterministic; two targets with equal signatures are assumed to
/// return the same data for the same window.
pub type SignatureFn = dyn Fn(&QueryRequest, &Target) -> Result<String> + Send + Sync;

/// Signature over expression, effective step, raw window and exemplar flag
pub fn default_signature(request: &QueryRequest, target: &Target) -> Result<String> {
    let identity = request.target_identity(&target.ref_id);
    let raw_range = serde_json::to_string(&request.raw_range)
        .map_err(|e| Error::signature(&identity, e))?;
    Ok(format!(
        "{}|{}|{}|{}",
        target.expr,
        target.interval.as_deref().unwrap_or(&request.interval),
        raw_range,
        target.exemplar
    ))
}

/// InfluxQL-style signature over request step, raw window and query text
///
/// Per-target interval overrides and exemplars are ignored.
pub fn influx_signature(request: &QueryRequest, target: &Target) -> Result<String> {
    let identity = request.target_identity(&target.ref_id);
    let raw_range = serde_json::to_string(&request.raw_range)
        .map_err(|e| Error::signature(&identity, e))?;
    Ok(format!("{}|{}|{}", request.interval, raw_range, target.expr))
}

/// How a planned request will be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Not cache-eligible; executed and returned untouched
    Bypass,
    /// Cache-eligible, executed over the full window
    Full,
    /// Cache-eligible, executed over the delta since the last fetch
    Partial,
}

/// What the merger needs to know about a planned request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanMetadata {
    /// Signature of each target at planning time
    pub target_signatures: HashMap<TargetIdentity, String>,
    /// Whether the response should be merged into the cache
    pub should_cache: bool,
    /// `prev_to` each target was narrowed against; empty unless partial
    pub baselines: HashMap<TargetIdentity, Timestamp>,
}

/// Output of [`RequestPlanner::plan`]
#[derive(Debug, Clone)]
pub struct CachePlan {
    requests: Vec<QueryRequest>,
    /// Input for the merger
    pub metadata: PlanMetadata,
    /// Full, partial or bypass
    pub kind: PlanKind,
    /// Entries dropped while planning
    pub invalidated: usize,
}

impl CachePlan {
    fn passthrough(request: &QueryRequest, metadata: PlanMetadata, kind: PlanKind) -> Self {
        Self {
            requests: vec![request.clone()],
            metadata,
            kind,
            invalidated: 0,
        }
    }

    /// Plan that executes `request` untouched and skips the cache
    pub(crate) fn bypass(request: &QueryRequest) -> Self {
        Self::passthrough(request, PlanMetadata::default(), PlanKind::Bypass)
    }

    /// Requests to execute (always exactly one)
    pub fn requests(&self) -> &[QueryRequest] {
        &self.requests
    }

    /// The request to hand to the transport
    pub fn request(&self) -> &QueryRequest {
        &self.requests[0]
    }
}

/// Narrows now-relative requests to the part of the window not yet cached
#[derive(Debug, Clone)]
pub struct RequestPlanner {
    overlap_window_ms: i64,
}

impl RequestPlanner {
    /// Create a planner re-requesting `overlap_window_ms` before the last fetch
    pub fn new(overlap_window_ms: i64) -> Self {
        Self {
            overlap_window_ms: overlap_window_ms.max(0),
        }
    }

    /// Overlap window in milliseconds
    pub fn overlap_window_ms(&self) -> i64 {
        self.overlap_window_ms
    }

    /// Plan the execution of `request`
    ///
    /// A signature failure is returned before the store is touched. When any
    /// target cannot be served incrementally, every target of the request is
    /// invalidated and the full window is fetched.
    pub fn plan(
        &self,
        request: &QueryRequest,
        store: &mut CacheStore,
        signature_fn: &SignatureFn,
    ) -> Result<CachePlan> {
        let should_cache = request.raw_range.is_now_relative();
        if !should_cache {
            return Ok(CachePlan::bypass(request));
        }

        let mut target_signatures = HashMap::with_capacity(request.targets.len());
        for target in &request.targets {
            let identity = request.target_identity(&target.ref_id);
            let signature = signature_fn(request, target)?;
            target_signatures.insert(identity, signature);
        }

        let mut metadata = PlanMetadata {
            target_signatures,
            should_cache,
            baselines: HashMap::new(),
        };

        if request.targets.is_empty() {
            return Ok(CachePlan::passthrough(request, metadata, PlanKind::Full));
        }

        let TimeRange { from, to } = request.range;
        let mut baselines = HashMap::with_capacity(metadata.target_signatures.len());
        let mut full = false;

        for (identity, signature) in &metadata.target_signatures {
            match store.get(identity) {
                None => {
                    tracing::debug!(target_identity = %identity, "No cached entry, full fetch");
                    full = true;
                }
                Some(entry) if entry.signature != *signature => {
                    tracing::debug!(target_identity = %identity, "Signature changed, full fetch");
                    full = true;
                }
                Some(entry) if from <= entry.prev_to && to > entry.prev_to => {
                    baselines.insert(identity.clone(), entry.prev_to);
                }
                Some(entry) => {
                    tracing::debug!(
                        target_identity = %identity,
                        prev_to = entry.prev_to,
                        from,
                        to,
                        "Window not contiguous with cache, full fetch"
                    );
                    full = true;
                }
            }
        }

        let prev_to = match baselines.values().copied().min() {
            Some(prev_to) if !full => prev_to,
            _ => {
                let invalidated = metadata
                    .target_signatures
                    .keys()
                    .filter(|identity| store.remove(identity).is_some())
                    .count();
                return Ok(CachePlan {
                    requests: vec![request.clone()],
                    metadata,
                    kind: PlanKind::Full,
                    invalidated,
                });
            }
        };

        let partial_from = round_down(
            (prev_to - self.overlap_window_ms).max(from),
            request.interval_ms,
        );

        tracing::debug!(
            request_id = %request.request_id,
            from,
            partial_from,
            to,
            "Narrowed request to uncached delta"
        );

        metadata.baselines = baselines;

        Ok(CachePlan {
            requests: vec![request.with_range(TimeRange::new(partial_from, to))],
            metadata,
            kind: PlanKind::Partial,
            invalidated: 0,
        })
    }
}

/// Floor `value` to a multiple of `step`; steps below 1ms leave it unchanged
fn round_down(value: Timestamp, step: i64) -> Timestamp {
    if step <= 0 {
        value
    } else {
        value.div_euclid(step) * step
    }
}
