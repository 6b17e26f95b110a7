//! Prometheus metrics exporter for the query cache
//!
//! Renders [`CacheMetrics`] in Prometheus text exposition format, followed
//! by whatever the process registered in the default `prometheus` registry.

use std::fmt::Write;
use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};

use super::{CacheMetrics, CacheMetricsSnapshot};

/// Configuration for Prometheus exporter
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Prefix for all metric names (default: "query_cache")
    pub metric_prefix: String,
    /// Append metrics from the default prometheus registry
    pub include_global_metrics: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            metric_prefix: "query_cache".to_string(),
            include_global_metrics: true,
        }
    }
}

/// Prometheus metrics exporter
pub struct PrometheusExporter {
    config: PrometheusConfig,
    metrics: Arc<CacheMetrics>,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    pub fn new(config: PrometheusConfig, metrics: Arc<CacheMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let mut output = String::new();
        let snapshot = self.metrics.snapshot();

        self.export_cache_metrics(&mut output, &self.config.metric_prefix, &snapshot);

        if self.config.include_global_metrics {
            match self.export_global_metrics() {
                Ok(global) => output.push_str(&global),
                Err(e) => tracing::warn!(error = %e, "Skipping global metrics"),
            }
        }

        output
    }

    fn export_cache_metrics(&self, output: &mut String, prefix: &str, s: &CacheMetricsSnapshot) {
        let counters: [(&str, &str, u64); 13] = [
            ("plans_total", "Total requests planned", s.plans_total),
            ("plans_partial_total", "Requests narrowed to the uncached delta", s.plans_partial),
            ("plans_full_total", "Cache-eligible requests fetched over the full window", s.plans_full),
            ("plans_bypassed_total", "Requests not eligible for caching", s.plans_bypassed),
            ("invalidations_total", "Cache entries dropped on signature or window change", s.invalidations),
            ("merges_total", "Responses merged into the cache", s.merges),
            ("frames_appended_total", "New series added to the cache", s.frames_appended),
            ("frames_amended_total", "Cached series amended with fresh rows", s.frames_amended),
            ("frames_evicted_total", "Series evicted after trimming to zero rows", s.frames_evicted),
            ("rows_fetched_total", "Rows received from the backend", s.rows_fetched),
            ("rows_returned_total", "Rows returned to callers", s.rows_returned),
            ("bytes_transferred_total", "Response bytes reported to the transfer observer", s.bytes_transferred),
            ("shape_errors_total", "Merges rejected for mismatched frame shapes", s.shape_errors),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {}_{} {}", prefix, name, help);
            let _ = writeln!(output, "# TYPE {}_{} counter", prefix, name);
            let _ = writeln!(output, "{}_{} {}\n", prefix, name, value);
        }

        let gauges = [
            (
                "partial_ratio",
                "Share of cache-eligible requests served incrementally (0.0-1.0)",
                s.partial_ratio(),
            ),
            (
                "cached_row_ratio",
                "Share of returned rows served from the cache (0.0-1.0)",
                s.cached_row_ratio(),
            ),
        ];

        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {}_{} {}", prefix, name, help);
            let _ = writeln!(output, "# TYPE {}_{} gauge", prefix, name);
            let _ = writeln!(output, "{}_{} {:.4}\n", prefix, name, value);
        }

        let _ = writeln!(output, "# HELP {}_uptime_seconds Cache uptime in seconds", prefix);
        let _ = writeln!(output, "# TYPE {}_uptime_seconds gauge", prefix);
        let _ = writeln!(output, "{}_uptime_seconds {}\n", prefix, s.uptime_secs);
    }

    /// Export global metrics from prometheus crate registry
    fn export_global_metrics(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;

        String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
    }

    /// Export metrics as HTTP response body with correct content type
    pub fn export_http(&self) -> (String, &'static str) {
        let body = self.export();
        let content_type = "text/plain; version=0.0.4; charset=utf-8";
        (body, content_type)
    }
}
