//! Dashboard refresh simulator
//!
//! Replays an auto-refreshing panel against a synthetic histogram backend and
//! reports how much data the incremental cache avoided re-fetching.
//!
//! # Configuration
//!
//! Cache settings are read from:
//! 1. `QUERY_CACHE_CONFIG` environment variable (path to TOML file)
//! 2. `./query-cache.toml` in current directory
//! 3. Default configuration
//!
//! Simulation knobs come from the environment:
//! - `SIM_REFRESHES` - number of refresh ticks (default: 20)
//! - `SIM_TICK_MS` - wall-clock delay between ticks (default: 100)
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=incremental_query_cache=debug ./refresh-sim
//! ```

use async_trait::async_trait;
use incremental_query_cache::{
    cache::Transport,
    telemetry::{PrometheusConfig, PrometheusExporter, TransferObserver},
    Field, FieldValues, Frame, Labels, QueryCache, QueryCacheConfig, QueryRequest, RawTimeRange,
    Result, Target, TargetIdentity, TimeRange,
};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

// =============================================================================
// Simulation Parameters
// =============================================================================

/// Virtual start time of the simulation (2023-02-01T14:42:30Z)
const START_MS: i64 = 1_675_262_550_000;

/// Panel window length
const WINDOW_MS: i64 = 3_600_000;

/// Virtual time advanced per refresh tick
const REFRESH_MS: i64 = 30_000;

/// Query step
const STEP_MS: i64 = 15_000;

/// Samples newer than this are not yet ingested by the backend
const INGEST_LAG_MS: i64 = 20_000;

/// Histogram buckets returned per target
const BUCKETS: &[&str] = &["0.1", "0.5", "1", "+Inf"];

// =============================================================================
// Synthetic Backend
// =============================================================================

/// Backend returning one series per histogram bucket
///
/// The sample at `t` is only visible once the virtual clock passed
/// `t + INGEST_LAG_MS`; until then it is returned as null, the way a lagging
/// ingester would.
struct SyntheticBackend {
    now: parking_lot::Mutex<i64>,
}

impl SyntheticBackend {
    fn new(now: i64) -> Self {
        Self {
            now: parking_lot::Mutex::new(now),
        }
    }

    fn advance(&self, by: i64) -> i64 {
        let mut now = self.now.lock();
        *now += by;
        *now
    }

    fn sample(t: i64, bucket: usize) -> f64 {
        let phase = (t / STEP_MS) as f64 / 40.0;
        (bucket as f64 + 1.0) * 100.0 + phase.sin() * 10.0
    }
}

#[async_trait]
impl Transport for SyntheticBackend {
    async fn fetch(&self, request: &QueryRequest) -> Result<Vec<Frame>> {
        let now = *self.now.lock();
        let first = (request.range.from + STEP_MS - 1).div_euclid(STEP_MS) * STEP_MS;
        let time: Vec<i64> = (first..=request.range.to)
            .step_by(STEP_MS as usize)
            .collect();

        let mut frames = Vec::new();
        for target in &request.targets {
            for (idx, bucket) in BUCKETS.iter().enumerate() {
                let mut labels = Labels::new();
                labels.insert("le".to_string(), bucket.to_string());
                let values = time
                    .iter()
                    .map(|t| (*t + INGEST_LAG_MS <= now).then(|| Self::sample(*t, idx)))
                    .collect();
                frames.push(Frame::new(
                    target.ref_id.clone(),
                    time.clone(),
                    vec![Field::number("value", labels, values)],
                ));
            }
        }
        Ok(frames)
    }
}

/// Logs every transfer observation
struct LoggingObserver;

impl TransferObserver for LoggingObserver {
    fn on_transfer_observed(&self, request_id: &str, target: &TargetIdentity, byte_size: usize) {
        info!(request_id, target_identity = %target, bytes = byte_size, "Transfer observed");
    }
}

// =============================================================================
// Refresh Loop
// =============================================================================

fn build_request(now: i64) -> QueryRequest {
    QueryRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        dashboard_uid: "sim-dashboard".to_string(),
        panel_id: 1,
        range: TimeRange::new(now - WINDOW_MS, now),
        raw_range: RawTimeRange::new("now-1h", "now"),
        interval_ms: STEP_MS,
        interval: "15s".to_string(),
        targets: vec![Target::new(
            "A",
            "sum by(le) (rate(request_duration_seconds_bucket[$__rate_interval]))",
        )],
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(name, value = %value, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

async fn run(cache: &QueryCache, backend: &SyntheticBackend, refreshes: usize, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    for n in 0..refreshes {
        ticker.tick().await;
        let now = backend.advance(REFRESH_MS);
        let request = build_request(now);

        match cache.execute(&request, backend).await {
            Ok(frames) => {
                let rows: usize = frames.iter().map(Frame::len).sum();
                let nulls: usize = frames
                    .iter()
                    .flat_map(|f| &f.fields)
                    .map(|field| match &field.values {
                        FieldValues::Number(v) => v.iter().filter(|v| v.is_none()).count(),
                        _ => 0,
                    })
                    .sum();
                info!(refresh = n, frames = frames.len(), rows, nulls, "Refresh served");
            }
            Err(e) => warn!(refresh = n, error = %e, "Refresh failed"),
        }
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("incremental_query_cache=info".parse()?)
                .add_directive("refresh_sim=info".parse()?),
        )
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = QueryCacheConfig::load();
    info!(
        enabled = config.enabled,
        overlap_window = %config.overlap_window,
        "Cache configured"
    );

    let cache = QueryCache::builder()
        .with_config(config)
        .with_observer(LoggingObserver)
        .build()?;
    let backend = SyntheticBackend::new(START_MS);

    let refreshes = env_or("SIM_REFRESHES", 20usize);
    let tick = Duration::from_millis(env_or("SIM_TICK_MS", 100u64));

    tokio::select! {
        _ = run(&cache, &backend, refreshes, tick) => {},
        _ = shutdown_signal() => {},
    }

    let stats = cache.stats();
    info!(entries = stats.entries, rows = stats.rows, "Cache state");
    println!("{}", serde_json::to_string_pretty(&cache.metrics().snapshot())?);

    let exporter = PrometheusExporter::new(
        PrometheusConfig {
            include_global_metrics: false,
            ..PrometheusConfig::default()
        },
        cache.metrics().clone(),
    );
    print!("{}", exporter.export());

    info!("Simulation complete");
    Ok(())
}
