//! Core request types shared by the planner, merger and transport

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Raw `to` marker for windows anchored to the current time
pub const NOW: &str = "now";

/// Absolute time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub from: Timestamp,
    /// End timestamp (inclusive)
    pub to: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.from && timestamp <= self.to
    }

    /// Get the duration of this range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.to - self.from
    }
}

/// Time range as the user expressed it, e.g. `now-6h` .. `now`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTimeRange {
    /// Raw start expression
    pub from: String,
    /// Raw end expression
    pub to: String,
}

impl RawTimeRange {
    /// Create a raw range from its two expressions
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether the window ends at the literal `now` marker
    ///
    /// Only such windows grow exclusively at their trailing edge.
    pub fn is_now_relative(&self) -> bool {
        self.to == NOW
    }
}

impl fmt::Display for RawTimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.from, self.to)
    }
}

/// One query within a multi-query request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Query slot id within the panel (`A`, `B`, ...)
    pub ref_id: String,
    /// Query expression sent to the backend
    pub expr: String,
    /// Per-target step override (display string, e.g. `30s`)
    #[serde(default)]
    pub interval: Option<String>,
    /// Request exemplars alongside samples
    #[serde(default)]
    pub exemplar: bool,
}

impl Target {
    /// Create a target with no overrides
    pub fn new(ref_id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            expr: expr.into(),
            interval: None,
            exemplar: false,
        }
    }

    /// Set a per-target step override
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }
}

/// A panel's query request: all of its targets over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Host-assigned request id, used for telemetry correlation
    pub request_id: String,
    /// Dashboard owning the panel
    pub dashboard_uid: String,
    /// Panel issuing the request
    pub panel_id: u64,
    /// Resolved absolute window
    pub range: TimeRange,
    /// Window as expressed by the user
    pub raw_range: RawTimeRange,
    /// Query step in milliseconds
    pub interval_ms: i64,
    /// Query step display string
    pub interval: String,
    /// Queries to execute
    pub targets: Vec<Target>,
}

impl QueryRequest {
    /// Identity of a target slot of this request
    pub fn target_identity(&self, ref_id: &str) -> TargetIdentity {
        TargetIdentity::new(&self.dashboard_uid, self.panel_id, ref_id)
    }

    /// Copy of this request over a different absolute window
    pub fn with_range(&self, range: TimeRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }
}

/// Stable key for one query slot, independent of the query content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// Dashboard uid
    pub dashboard_uid: String,
    /// Panel id
    pub panel_id: u64,
    /// Target ref id
    pub ref_id: String,
}

impl TargetIdentity {
    /// Create a target identity
    pub fn new(dashboard_uid: &str, panel_id: u64, ref_id: &str) -> Self {
        Self {
            dashboard_uid: dashboard_uid.to_string(),
            panel_id,
            ref_id: ref_id.to_string(),
        }
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.dashboard_uid, self.panel_id, self.ref_id)
    }
}
