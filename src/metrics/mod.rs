//! Prometheus instrumentation.
//!
//! Metrics live in process-wide statics and are exposed through [`REGISTRY`].
//! Embedders scrape them with [`gather_metrics`].

#[cfg(test)]
mod metrics_test;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;

lazy_static! {
    pub static ref QUERY_FETCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("query_fetch_total", "Fetches issued per query kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref QUERY_FETCH_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("query_fetch_errors", "Failed fetches per query kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref QUERY_FETCH_DURATION_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("query_fetch_duration_ms", "Fetch latency in ms, long-polls included")
            .buckets(exponential_buckets(1.0, 4.0, 10).unwrap_or_default()),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_VIEWS: IntGauge =
        IntGauge::new("active_views", "Views currently running").expect("metric can not be created");

    pub static ref RENDER_SIGNALS: IntCounter =
        IntCounter::new("render_signals", "Coalesced render signals emitted").expect("metric can not be created");

    pub static ref DEDUP_PROMOTIONS: IntCounter =
        IntCounter::new("dedup_promotions", "Dedup locks acquired").expect("metric can not be created");

    pub static ref DEDUP_DEMOTIONS: IntCounter =
        IntCounter::new("dedup_demotions", "Dedup locks lost or released").expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(QUERY_FETCH_TOTAL.clone()),
        Box::new(QUERY_FETCH_ERRORS.clone()),
        Box::new(QUERY_FETCH_DURATION_MS.clone()),
        Box::new(ACTIVE_VIEWS.clone()),
        Box::new(RENDER_SIGNALS.clone()),
        Box::new(DEDUP_PROMOTIONS.clone()),
        Box::new(DEDUP_DEMOTIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {e}");
        }
    }
}

/// Renders every mirror metric in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
