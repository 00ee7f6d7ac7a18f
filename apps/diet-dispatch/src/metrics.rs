use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static BOOT_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new("diet_dispatch_boot_total", "dispatch boots"))
        .expect("valid boot counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static TOPOLOGY_DECLARED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "diet_dispatch_topology_declared_total",
            "broker entities declared at startup by kind",
        ),
        &["kind"],
    )
    .expect("valid topology counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "diet_dispatch_published_total",
            "publish attempts by publisher and outcome",
        ),
        &["publisher", "outcome"],
    )
    .expect("valid publish counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PUBLISH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "diet_dispatch_publish_failures_total",
            "failed publishes by publisher and the stage that failed",
        ),
        &["publisher", "stage"],
    )
    .expect("valid failure counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static REJECTED_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "diet_dispatch_rejected_requests_total",
        "parameter requests rejected before publish",
    ))
    .expect("valid rejection counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
