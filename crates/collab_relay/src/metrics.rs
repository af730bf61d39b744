use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::PeerSendFailure;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

/// Metrics collection for the relay
pub struct Metrics {
    pub registry: Registry,

    // Connection metrics
    pub connections_total: Counter,
    pub connections_active: Gauge,
    pub rooms_active: Gauge,

    // Relay metrics
    pub messages_received: CounterVec,
    pub deliveries_total: Counter,
    pub deliveries_skipped: CounterVec,
    pub relay_bytes_total: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total =
            Counter::new("relay_connections_total", "Total number of accepted connections").unwrap();
        registry.register(Box::new(connections_total.clone())).unwrap();

        let connections_active =
            Gauge::new("relay_connections_active", "Number of currently open connections").unwrap();
        registry.register(Box::new(connections_active.clone())).unwrap();

        let rooms_active = Gauge::new("relay_rooms_active", "Number of rooms with at least one member").unwrap();
        registry.register(Box::new(rooms_active.clone())).unwrap();

        let messages_received = CounterVec::new(
            Opts::new("relay_messages_received_total", "Update messages received from clients"),
            &["kind"],
        )
        .unwrap();
        registry.register(Box::new(messages_received.clone())).unwrap();

        let deliveries_total =
            Counter::new("relay_deliveries_total", "Update messages queued to a peer").unwrap();
        registry.register(Box::new(deliveries_total.clone())).unwrap();

        let deliveries_skipped = CounterVec::new(
            Opts::new("relay_deliveries_skipped_total", "Deliveries not attempted or failed, per reason"),
            &["reason"],
        )
        .unwrap();
        registry.register(Box::new(deliveries_skipped.clone())).unwrap();

        let relay_bytes_total =
            Counter::new("relay_bytes_total", "Total payload bytes queued to peers").unwrap();
        registry.register(Box::new(relay_bytes_total.clone())).unwrap();

        Self {
            registry,
            connections_total,
            connections_active,
            rooms_active,
            messages_received,
            deliveries_total,
            deliveries_skipped,
            relay_bytes_total,
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Get metrics as JSON (for dashboards)
    pub fn as_json(&self) -> Result<serde_json::Value> {
        let metric_families = self.registry.gather();
        let metrics: Vec<_> = metric_families
            .iter()
            .map(|family| {
                serde_json::json!({
                    "name": family.get_name(),
                    "help": family.get_help(),
                    "type": format!("{:?}", family.get_field_type()),
                    "metrics": family.get_metric().len(),
                })
            })
            .collect();

        Ok(serde_json::json!({
            "total_metrics": metrics.len(),
            "metrics": metrics,
        }))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons a delivery can be skipped, pre-registered so every series is
/// exported from startup
const SKIP_REASONS: [&str; 3] = [
    "not_open",
    PeerSendFailure::QueueFull.as_label(),
    PeerSendFailure::Closed.as_label(),
];

/// Register every series at zero so scrapes see the full set before the
/// first client connects
pub fn init() -> Result<Arc<Metrics>> {
    let metrics = METRICS.clone();

    metrics.connections_active.set(0.0);
    metrics.rooms_active.set(0.0);
    for kind in ["binary", "text"] {
        metrics.messages_received.with_label_values(&[kind]).inc_by(0.0);
    }
    for reason in SKIP_REASONS {
        metrics.deliveries_skipped.with_label_values(&[reason]).inc_by(0.0);
    }

    let families = metrics.registry.gather().len();
    tracing::info!(families, "Metrics registry initialized");

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.encode().is_ok());
    }

    #[test]
    fn test_metrics_json() {
        let metrics = Metrics::new();
        let json = metrics.as_json().unwrap();
        assert!(json["total_metrics"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_connection_metrics() {
        let metrics = Metrics::new();
        metrics.connections_total.inc();
        metrics.connections_active.set(3.0);
        metrics.deliveries_skipped.with_label_values(&["not_open"]).inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("relay_connections_active 3"));
        assert!(text.contains("reason=\"not_open\""));
    }

    #[test]
    fn test_init_exports_every_series() {
        let metrics = init().unwrap();
        let text = metrics.encode().unwrap();

        assert!(text.contains("relay_rooms_active"));
        assert!(text.contains("kind=\"text\""));
        assert!(text.contains("reason=\"queue_full\""));
        assert!(text.contains("reason=\"closed\""));
    }
}
