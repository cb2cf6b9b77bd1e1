use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Opts, TextEncoder};

/// Register additional metrics of our own structs by using this registry instance.
static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry(prometheus::Registry::new()));

pub static MESSAGES_RECEIVED: Lazy<Counter> = Lazy::new(|| {
    Counter::new("messages_received", Opts::new("messages_received_total", "count of channel posts handed to the pipeline"))
});
pub static GATE_SKIPS: Lazy<GateCounters> = Lazy::new(|| {
    let opts = Opts::new("messages_gated_out_total", "count of messages dropped before deduplication");
    GateCounters {
        not_monitored: Counter::new("gated_out (not_monitored)", opts.clone().const_label("reason", "not_monitored")),
        no_detection: Counter::new("gated_out (no_detection)", opts.const_label("reason", "no_detection")),
    }
});
pub static GIFTS_DETECTED: Lazy<Counter> = Lazy::new(|| {
    Counter::new("gifts_detected", Opts::new("gifts_detected_total", "count of messages classified as gift events"))
});
pub static DUPLICATES_SUPPRESSED: Lazy<Counter> = Lazy::new(|| {
    Counter::new("duplicates_suppressed", Opts::new("duplicates_suppressed_total", "count of messages suppressed by the dedup window"))
});
pub static EVENTS_PERSISTED: Lazy<Counter> = Lazy::new(|| {
    Counter::new("events_persisted", Opts::new("events_persisted_total", "count of gift events written to storage"))
});
pub static PERSIST_FAILURES: Lazy<Counter> = Lazy::new(|| {
    Counter::new("persist_failures", Opts::new("persist_failures_total", "count of gift events lost to storage errors"))
});
pub static RECIPIENTS: Lazy<RecipientCounters> = Lazy::new(|| {
    let opts = Opts::new("notification_recipients_total", "count of recipients per fan-out result");
    RecipientCounters {
        delivered: Counter::new("recipients (delivered)", opts.clone().const_label("result", "delivered")),
        failed: Counter::new("recipients (failed)", opts.clone().const_label("result", "failed")),
        skipped_no_token: Counter::new("recipients (skipped)", opts.const_label("result", "skipped_no_token")),
    }
});

pub fn init() -> axum::Router {
    let prometheus = REGISTRY
        .register(&MESSAGES_RECEIVED)
        .register(&GATE_SKIPS.not_monitored)
        .register(&GATE_SKIPS.no_detection)
        .register(&GIFTS_DETECTED)
        .register(&DUPLICATES_SUPPRESSED)
        .register(&EVENTS_PERSISTED)
        .register(&PERSIST_FAILURES)
        .register(&RECIPIENTS.delivered)
        .register(&RECIPIENTS.failed)
        .register(&RECIPIENTS.skipped_no_token)
        .unwrap();

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    axum::Router::new()
        .route("/metrics", get(|| async move {
            let mut buffer = vec![];
            let metrics = prometheus.gather();
            TextEncoder::new().encode(&metrics, &mut buffer).unwrap();
            let custom_metrics = String::from_utf8(buffer).unwrap();

            metric_handle.render() + custom_metrics.as_str()
        }))
        .layer(prometheus_layer)
}

pub struct Counter {
    inner: prometheus::Counter,
    name: String
}
pub struct GateCounters {
    pub not_monitored: Counter,
    pub no_detection: Counter,
}
pub struct RecipientCounters {
    pub delivered: Counter,
    pub failed: Counter,
    pub skipped_no_token: Counter,
}
struct Registry(prometheus::Registry);

impl Counter {
    fn new(name: &str, opts: Opts) -> Counter {
        let c = prometheus::Counter::with_opts(opts)
            .unwrap_or_else(|e| panic!("unable to create {name} counter: {e}"));
        Counter { inner: c, name: name.to_string() }
    }

    pub fn inc(&self) {
        self.inner.inc()
    }

    pub fn inc_by(&self, delta: u32) {
        self.inner.inc_by(delta as f64)
    }
}

impl Registry {
    fn register(&self, counter: &Counter) -> &Self {
        self.0.register(Box::new(counter.inner.clone()))
            .unwrap_or_else(|e| panic!("unable to register the {} counter: {e}", counter.name));
        self
    }

    fn unwrap(&self) -> prometheus::Registry {
        self.0.clone()
    }
}
