use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    search_requests: Counter<u64>,
    search_duration_ms: Histogram<f64>,
    research_passes: Counter<u64>,
    step_duration_ms: Histogram<f64>,
    runs: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("leadresearch.pipeline");
        PipelineMetrics {
            search_requests: meter
                .u64_counter("search_requests_total")
                .with_description("Web search requests by status")
                .init(),
            search_duration_ms: meter
                .f64_histogram("search_duration_ms")
                .with_description("Web search latency in milliseconds")
                .init(),
            research_passes: meter
                .u64_counter("research_passes_total")
                .with_description("Search/extract/reflect passes executed")
                .init(),
            step_duration_ms: meter
                .f64_histogram("step_duration_ms")
                .with_description("State machine step runtime in milliseconds")
                .init(),
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Completed research runs by outcome")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("LEADRESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "LEADRESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
}

pub(crate) fn record_search_request(status: &'static str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status)];
    metrics.search_requests.add(1, &attrs);
    metrics.search_duration_ms.record(duration_ms as f64, &attrs);
}

pub(crate) fn record_step(step: &'static str, duration_ms: u64) {
    let metrics = handles();
    metrics
        .step_duration_ms
        .record(duration_ms as f64, &[KeyValue::new("step", step)]);
}

pub(crate) fn record_pass() {
    handles().research_passes.add(1, &[]);
}

pub(crate) fn record_run(outcome: &'static str) {
    handles().runs.add(1, &[KeyValue::new("outcome", outcome)]);
}
