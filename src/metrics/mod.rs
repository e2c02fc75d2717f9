//! Prometheus counters for change propagation.
//!
//! Collectors are registered in this crate's [`REGISTRY`]; hosts that run
//! their own exporter can call [`register_custom_metrics`] on their registry.

#[cfg(test)]
mod metrics_test;

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref CHANGE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("meshconf_change_events_total", "Backend change events received"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref DROPPED_EVENTS: IntCounter = IntCounter::new(
        "meshconf_dropped_events_total",
        "Change events dropped because a subscription queue was full or closed"
    )
    .expect("metric can not be created");

    pub static ref REFRESH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("meshconf_refresh_total", "Refreshes performed per strategy"),
        &["strategy"]
    )
    .expect("metric can not be created");

    pub static ref BINDING_APPLY_FAILURES: IntCounter = IntCounter::new(
        "meshconf_binding_apply_failures_total",
        "Bindings that failed to render or apply"
    )
    .expect("metric can not be created");

    pub static ref SWEPT_BINDINGS: IntCounter = IntCounter::new(
        "meshconf_swept_bindings_total",
        "Dead bindings removed by the sweeper"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

pub fn register_custom_metrics(registry: &Registry) {
    let collectors: [Box<dyn Collector>; 5] = [
        Box::new(CHANGE_EVENTS.clone()),
        Box::new(DROPPED_EVENTS.clone()),
        Box::new(REFRESH_TOTAL.clone()),
        Box::new(BINDING_APPLY_FAILURES.clone()),
        Box::new(SWEPT_BINDINGS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {:?}", e);
        }
    }
}

/// Export metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
