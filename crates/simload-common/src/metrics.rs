//! Metrics for load generation observability
//!
//! Instruments are created lazily on the global meter and exported by the
//! meter provider installed in [`crate::telemetry`]:
//! - generated load size (KWOK nodes, namespaces per config)
//! - per-call API latency (verb, kind)
//! - reconcile duration and error counts

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("simload"));

// ============================================================================
// Load Size Metrics
// ============================================================================

/// Gauge of KWOK nodes matched by a config's node selector
///
/// Labels:
/// - `config`: ScaleLoadConfig name
pub static NODES_TOTAL: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("kwok_load_generator_nodes_total")
        .with_description("Number of KWOK nodes matched by the node selector")
        .with_unit("{nodes}")
        .build()
});

/// Gauge of generated namespaces owned by a config
///
/// Labels:
/// - `config`: ScaleLoadConfig name
pub static NAMESPACES_TOTAL: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("kwok_load_generator_namespaces_total")
        .with_description("Number of generated namespaces")
        .with_unit("{namespaces}")
        .build()
});

// ============================================================================
// API Call Metrics
// ============================================================================

/// Histogram of object-store call duration
///
/// Labels:
/// - `verb`: get, list, create, update, delete
/// - `kind`: Namespace, ConfigMap, Node, ...
pub static API_CALL_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("kwok_load_generator_api_calls_duration_seconds")
        .with_description("Duration of API calls issued by the load generator")
        .with_unit("s")
        .build()
});

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Histogram of reconcile duration
///
/// Labels:
/// - `config`: ScaleLoadConfig name
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("kwok_load_generator_reconcile_duration_seconds")
        .with_description("Duration of ScaleLoadConfig reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `config`: ScaleLoadConfig name
/// - `error_type`: transient, permanent
pub static ERRORS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kwok_load_generator_errors_total")
        .with_description("Total number of load generation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Record a reconciliation with timing
pub struct ReconcileTimer {
    config: String,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds elapsed since [`ReconcileTimer::start`]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("config", self.config),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, error_type: &str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("config", self.config.clone()),
                KeyValue::new("result", "error"),
            ],
        );
        record_error(&self.config, error_type);
    }
}

/// Count one load generation error
pub fn record_error(config: &str, error_type: &str) {
    ERRORS_TOTAL.add(
        1,
        &[
            KeyValue::new("config", config.to_string()),
            KeyValue::new("error_type", error_type.to_string()),
        ],
    );
}

/// Record the duration of one object-store call
pub fn record_api_call(verb: &str, kind: &str, seconds: f64) {
    API_CALL_DURATION.record(
        seconds,
        &[
            KeyValue::new("verb", verb.to_string()),
            KeyValue::new("kind", kind.to_string()),
        ],
    );
}

/// Update the load size gauges for a config
pub fn set_load_size(config: &str, nodes: u32, namespaces: u32) {
    let labels = [KeyValue::new("config", config.to_string())];
    NODES_TOTAL.record(i64::from(nodes), &labels);
    NAMESPACES_TOTAL.record(i64::from(namespaces), &labels);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_timer() {
        let timer = ReconcileTimer::start("load");
        assert_eq!(timer.config, "load");
        assert!(timer.elapsed_ms() >= 0.0);
        timer.success();
    }

    #[test]
    fn test_reconcile_timer_error() {
        ReconcileTimer::start("load").error("transient");
    }

    #[test]
    fn test_recording_helpers_do_not_panic() {
        record_api_call("create", "ConfigMap", 0.004);
        set_load_size("load", 10, 6);
        record_error("load", "permanent");
    }
}
