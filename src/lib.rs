//! Incremental result cache for now-relative time-series queries
//!
//! Dashboards re-run the same queries on every refresh over a window ending
//! at `now`. This crate caches the frames returned per query slot and, on the
//! next refresh, asks the backend only for the samples after the previous
//! fetch (plus a trailing overlap window for late data). The merged result
//! is the same as an uncached query over the full window.

pub mod cache;
pub mod config;
pub mod error;
pub mod frame;
pub mod telemetry;
pub mod types;

pub use cache::{CachePlan, PlanMetadata, QueryCache, QueryCacheBuilder, Transport};
pub use config::QueryCacheConfig;
pub use error::{Error, Result};
pub use frame::{Field, FieldIdentity, FieldType, FieldValues, Frame, Labels};
pub use types::{QueryRequest, RawTimeRange, Target, TargetIdentity, TimeRange, Timestamp};
