use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, TextEncoder};

static ACTIVE_BRIDGE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "livestream_bridge_workers_active",
        "Transcode workers currently registered",
    )
    .expect("failed to create livestream_bridge_workers_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register livestream_bridge_workers_active");
    gauge
});

static BRIDGE_WORKER_EXITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "livestream_bridge_worker_exits_total",
            "Transcode worker exits by reason",
        ),
        &["reason"],
    )
    .expect("failed to create livestream_bridge_worker_exits_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register livestream_bridge_worker_exits_total");
    counter
});

static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "livestream_webhook_events_total",
            "CDN webhook deliveries by event and outcome",
        ),
        &["event", "outcome"],
    )
    .expect("failed to create livestream_webhook_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register livestream_webhook_events_total");
    counter
});

pub fn set_active_workers(count: usize) {
    ACTIVE_BRIDGE_WORKERS.set(count as i64);
}

/// `reason` is `requested` for stop(), `crashed` otherwise.
pub fn record_worker_exit(requested: bool) {
    let reason = if requested { "requested" } else { "crashed" };
    BRIDGE_WORKER_EXITS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_webhook_event(event: &str, outcome: &str) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[event, outcome])
        .inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
