
use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntCounter, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;
lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();
static CACHE_HITS: OnceLock<IntCounterVec> = OnceLock::new();
static CACHE_MISSES: OnceLock<IntCounter> = OnceLock::new();
static PERSIST_FAILURES: OnceLock<IntCounter> = OnceLock::new();
static REQUEST_DURATION: OnceLock<Histogram> = OnceLock::new();

fn install<M>(cell: &OnceLock<M>, build: impl FnOnce() -> prometheus::Result<M>) -> anyhow::Result<()>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    if cell.get().is_some() {
        return Ok(());
    }
    let metric = build()?;
    if cell.set(metric.clone()).is_ok() {
        REGISTRY.register(Box::new(metric)).ok();
    }
    Ok(())
}

/// Register the engine's metrics. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    install(&REQUESTS, || {
        IntCounterVec::new(
            prometheus::opts!("ask_requests_total", "Questions handled, by outcome"),
            &["outcome"],
        )
    })?;
    install(&CACHE_HITS, || {
        IntCounterVec::new(
            prometheus::opts!("ask_cache_hits_total", "Cache hits per tier"),
            &["tier"],
        )
    })?;
    install(&CACHE_MISSES, || {
        IntCounter::new("ask_cache_misses_total", "Questions that missed every cache tier")
    })?;
    install(&PERSIST_FAILURES, || {
        IntCounter::new("ask_persist_failures_total", "Write-behind jobs that failed or were dropped")
    })?;
    install(&REQUEST_DURATION, || {
        Histogram::with_opts(prometheus::HistogramOpts::new(
            "ask_request_duration_seconds",
            "End-to-end question latency",
        ))
    })?;
    Ok(())
}
pub fn inc_request(outcome: &str) {
    if let Some(counter) = REQUESTS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}
pub fn inc_cache_hit(tier: &str) {
    if let Some(counter) = CACHE_HITS.get() {
        counter.with_label_values(&[tier]).inc();
    }
}
pub fn inc_cache_miss() {
    if let Some(counter) = CACHE_MISSES.get() {
        counter.inc();
    }
}
pub fn inc_persist_failure() {
    if let Some(counter) = PERSIST_FAILURES.get() {
        counter.inc();
    }
}
pub fn observe_request_duration(seconds: f64) {
    if let Some(histogram) = REQUEST_DURATION.get() {
        histogram.observe(seconds);
    }
}
/// Prometheus text exposition of every registered metric
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
#[cfg(feature = "cli")]
pub async fn get_metrics() -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    match gather_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
