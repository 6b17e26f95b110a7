//! Incremental query cache
//!
//! Serves now-relative dashboard refreshes by fetching only the time delta
//! since the previous refresh and stitching it onto cached frames.
//!
//! - **Store**: target identity -> cached frames (`store.rs`)
//! - **Planner**: full vs. narrowed fetch decision (`planner.rs`)
//! - **Merger**: amend, trim and evict against the store (`merger.rs`)
//! - **QueryCache**: facade with single-flight `execute` (`query_cache.rs`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  plan   ┌─────────────────┐  narrowed   ┌───────────┐
//! │  caller  │────────▶│ RequestPlanner  │────────────▶│ Transport │
//! └──────────┘         └────────┬────────┘  request    └─────┬─────┘
//!      ▲                        │ invalidate                 │ frames
//!      │                  ┌─────▼──────┐               ┌─────▼──────────┐
//!      └──────────────────│ CacheStore │◀──────────────│ ResponseMerger │
//!          full frames    └────────────┘  amend + trim └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use incremental_query_cache::{QueryCache, QueryCacheConfig};
//!
//! let cache = QueryCache::new(QueryCacheConfig::default())?;
//!
//! // Every refresh tick
//! let frames = cache.execute(&request, &transport).await?;
//! ```

mod merger;
mod planner;
mod query_cache;
mod store;

pub use merger::{amend_frame, trim_frame, MergeOutcome, MergeStats, ResponseMerger};
pub use planner::{
    default_signature, influx_signature, CachePlan, PlanKind, PlanMetadata, RequestPlanner,
    SignatureFn,
};
pub use query_cache::{CacheStats, QueryCache, QueryCacheBuilder, Transport};
pub use store::{CacheEntry, CacheStore};
