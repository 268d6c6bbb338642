//! Observability infrastructure for the IPMI poller
//!
//! Provides:
//! - Prometheus metrics (pass duration, tick outcomes, discovered sensors, publishing)
//! - Structured JSON logging of lifecycle events with tracing

use crate::sdr::SensorDescriptor;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramTimer, HistogramVec, IntCounter, IntCounterVec,
    IntGaugeVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for pass durations (in seconds); IPMI round trips are slow
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PollerMetricsInner> = OnceLock::new();

struct PollerMetricsInner {
    collection_duration_seconds: HistogramVec,
    ticks_total: IntCounterVec,
    sensors_discovered: IntGaugeVec,
    reservation_renewals_total: IntCounterVec,
    measurements_published_total: IntCounterVec,
    publish_errors_total: IntCounter,
}

impl PollerMetricsInner {
    fn new() -> Self {
        Self {
            collection_duration_seconds: register_histogram_vec!(
                "ipmi_poller_collection_duration_seconds",
                "Time spent in one poll pass of a host",
                &["host"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_duration_seconds"),

            ticks_total: register_int_counter_vec!(
                "ipmi_poller_ticks_total",
                "Poll ticks by outcome (published, empty, skipped, failed)",
                &["host", "outcome"]
            )
            .expect("Failed to register ticks_total"),

            sensors_discovered: register_int_gauge_vec!(
                "ipmi_poller_sensors_discovered",
                "Full sensor records found in the SDR of a host",
                &["host"]
            )
            .expect("Failed to register sensors_discovered"),

            reservation_renewals_total: register_int_counter_vec!(
                "ipmi_poller_reservation_renewals_total",
                "SDR reservations renewed after cancellation",
                &["host"]
            )
            .expect("Failed to register reservation_renewals_total"),

            measurements_published_total: register_int_counter_vec!(
                "ipmi_poller_measurements_published_total",
                "Measurements handed to the metrics sink",
                &["host"]
            )
            .expect("Failed to register measurements_published_total"),

            publish_errors_total: register_int_counter!(
                "ipmi_poller_publish_errors_total",
                "Measurement batches the metrics backend did not accept"
            )
            .expect("Failed to register publish_errors_total"),
        }
    }
}

/// Poller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PollerMetrics {
    _private: (),
}

impl Default for PollerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PollerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PollerMetricsInner {
        GLOBAL_METRICS.get_or_init(PollerMetricsInner::new)
    }

    /// Start timing a poll pass; observed when the timer is dropped
    pub fn start_collection_timer(&self, host: &str) -> HistogramTimer {
        self.inner()
            .collection_duration_seconds
            .with_label_values(&[host])
            .start_timer()
    }

    pub fn inc_tick(&self, host: &str, outcome: &str) {
        self.inner()
            .ticks_total
            .with_label_values(&[host, outcome])
            .inc();
    }

    pub fn set_sensors_discovered(&self, host: &str, count: usize) {
        self.inner()
            .sensors_discovered
            .with_label_values(&[host])
            .set(count as i64);
    }

    pub fn inc_reservation_renewals(&self, host: &str, renewals: u32) {
        self.inner()
            .reservation_renewals_total
            .with_label_values(&[host])
            .inc_by(renewals as u64);
    }

    pub fn inc_measurements_published(&self, host: &str, count: usize) {
        self.inner()
            .measurements_published_total
            .with_label_values(&[host])
            .inc_by(count as u64);
    }

    pub fn inc_publish_errors(&self) {
        self.inner().publish_errors_total.inc();
    }

    /// Default registry in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for poller lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log poller startup
    pub fn log_startup(&self, version: &str, entities: usize, poll_interval_secs: u64) {
        info!(
            event = "poller_started",
            instance = %self.instance,
            poller_version = %version,
            entities = entities,
            poll_interval_secs = poll_interval_secs,
            "IPMI poller started"
        );
    }

    /// Log poller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "poller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "IPMI poller shutting down"
        );
    }

    /// Log a sensor found while walking a host's SDR
    pub fn log_sensor_discovered(&self, host: &str, descriptor: &SensorDescriptor, monitored: bool) {
        info!(
            event = "sensor_discovered",
            instance = %self.instance,
            host = %host,
            sensor_number = descriptor.sensor_number,
            record_id = descriptor.record_id,
            sensor_name = %descriptor.name,
            sensor_type = descriptor.sensor_type,
            unit = %descriptor.units,
            monitored = monitored,
            "Discovered sensor"
        );
    }

    /// Log a poll tick that produced no batch because of an error
    pub fn log_tick_failed(&self, host: &str, error: &str) {
        warn!(
            event = "tick_failed",
            instance = %self.instance,
            host = %host,
            error = %error,
            "Poll tick failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_metrics_are_exported() {
        let metrics = PollerMetrics::new();

        drop(metrics.start_collection_timer("bmc-observability"));
        metrics.inc_tick("bmc-observability", "published");
        metrics.set_sensors_discovered("bmc-observability", 12);
        metrics.inc_reservation_renewals("bmc-observability", 1);
        metrics.inc_measurements_published("bmc-observability", 3);
        metrics.inc_publish_errors();

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for expected in [
            "ipmi_poller_collection_duration_seconds",
            "ipmi_poller_ticks_total",
            "ipmi_poller_sensors_discovered",
            "ipmi_poller_reservation_renewals_total",
            "ipmi_poller_measurements_published_total",
            "ipmi_poller_publish_errors_total",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_render_uses_text_format() {
        let metrics = PollerMetrics::new();
        metrics.inc_tick("bmc-render", "skipped");

        let text = String::from_utf8(metrics.render().unwrap()).unwrap();

        assert!(text.contains("# TYPE ipmi_poller_ticks_total counter"));
        assert!(text.contains(r#"host="bmc-render""#));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("poller-1");
        assert_eq!(logger.instance, "poller-1");
    }
}
