//! Prometheus metrics for sweep outcomes.

mod http_server;

pub use http_server::{serve_metrics, MetricsServerState, StatusSource};

use std::sync::Arc;

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::scheduler::ResultSink;
use crate::types::Outcome;

/// Per-path measurement gauges, updated after every sweep.
pub struct PathMetrics {
    registry: Registry,

    pub download_mbps: GaugeVec,
    pub upload_mbps: GaugeVec,
    pub latency_ms: GaugeVec,
    pub jitter_ms: GaugeVec,
    pub packet_loss_pct: GaugeVec,
    pub probe_duration_seconds: GaugeVec,
    pub last_probe_timestamp: IntGaugeVec,
    pub probe_success: IntGaugeVec,
}

impl PathMetrics {
    /// Create a new metrics instance with all collectors registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let download_mbps = GaugeVec::new(
            Opts::new("wanpulse_download_mbps", "Download rate in Mbps"),
            &["path", "server"],
        )?;
        let upload_mbps = GaugeVec::new(
            Opts::new("wanpulse_upload_mbps", "Upload rate in Mbps"),
            &["path", "server"],
        )?;
        let latency_ms = GaugeVec::new(
            Opts::new("wanpulse_latency_ms", "Round-trip latency in milliseconds"),
            &["path", "server"],
        )?;
        let jitter_ms = GaugeVec::new(
            Opts::new("wanpulse_jitter_ms", "Latency jitter in milliseconds"),
            &["path", "server"],
        )?;
        let packet_loss_pct = GaugeVec::new(
            Opts::new("wanpulse_packet_loss_pct", "Packet loss percentage"),
            &["path", "server"],
        )?;
        let probe_duration_seconds = GaugeVec::new(
            Opts::new(
                "wanpulse_probe_duration_seconds",
                "Duration of the last probe attempt",
            ),
            &["path"],
        )?;
        let last_probe_timestamp = IntGaugeVec::new(
            Opts::new(
                "wanpulse_last_probe_timestamp",
                "Unix timestamp of the last probe attempt",
            ),
            &["path"],
        )?;
        let probe_success = IntGaugeVec::new(
            Opts::new(
                "wanpulse_probe_success",
                "Whether the last probe succeeded (1) or failed (0)",
            ),
            &["path"],
        )?;

        registry.register(Box::new(download_mbps.clone()))?;
        registry.register(Box::new(upload_mbps.clone()))?;
        registry.register(Box::new(latency_ms.clone()))?;
        registry.register(Box::new(jitter_ms.clone()))?;
        registry.register(Box::new(packet_loss_pct.clone()))?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;
        registry.register(Box::new(last_probe_timestamp.clone()))?;
        registry.register(Box::new(probe_success.clone()))?;

        Ok(Self {
            registry,
            download_mbps,
            upload_mbps,
            latency_ms,
            jitter_ms,
            packet_loss_pct,
            probe_duration_seconds,
            last_probe_timestamp,
            probe_success,
        })
    }

    /// Record one outcome's gauges.
    pub fn record_outcome(&self, outcome: &Outcome) {
        let path = outcome.path.as_str();
        let server = outcome.server.as_ref().map_or("", |s| s.name.as_str());

        self.probe_duration_seconds
            .with_label_values(&[path])
            .set(outcome.elapsed.as_secs_f64());
        self.last_probe_timestamp
            .with_label_values(&[path])
            .set(outcome.started_at.timestamp());
        self.probe_success
            .with_label_values(&[path])
            .set(i64::from(!outcome.is_error()));

        if outcome.is_error() {
            return;
        }

        let labels = &[path, server];
        self.download_mbps
            .with_label_values(labels)
            .set(outcome.download_mbps);
        self.upload_mbps
            .with_label_values(labels)
            .set(outcome.upload_mbps);
        self.latency_ms
            .with_label_values(labels)
            .set(outcome.latency_ms);
        self.jitter_ms
            .with_label_values(labels)
            .set(outcome.jitter_ms);
        self.packet_loss_pct
            .with_label_values(labels)
            .set(outcome.packet_loss_pct);
    }

    /// Render the registry in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl StatusSource for crate::scheduler::ScheduleCoordinator {
    fn schedule_state(&self) -> crate::types::ScheduleState {
        self.status()
    }
}

/// Sink that mirrors every sweep into the metrics registry.
pub struct PrometheusSink(pub Arc<PathMetrics>);

impl ResultSink for PrometheusSink {
    fn on_sweep_complete(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            self.0.record_outcome(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PathSpec;
    use chrono::Utc;

    #[test]
    fn test_record_success_outcome() {
        let metrics = PathMetrics::new().unwrap();
        let mut outcome = Outcome::failure(&PathSpec::new("wan1"), Utc::now(), "");
        outcome.error = None;
        outcome.download_mbps = 123.0;

        metrics.record_outcome(&outcome);
        let text = metrics.gather();
        assert!(text.contains("wanpulse_download_mbps"));
        assert!(text.contains("123"));
        assert!(text.contains("wanpulse_probe_success{path=\"wan1\"} 1"));
    }

    #[test]
    fn test_failure_skips_measurement_gauges() {
        let metrics = PathMetrics::new().unwrap();
        let outcome = Outcome::failure(&PathSpec::new("wan1"), Utc::now(), "dead");

        metrics.record_outcome(&outcome);
        let text = metrics.gather();
        assert!(text.contains("wanpulse_probe_success{path=\"wan1\"} 0"));
        assert!(!text.contains("wanpulse_download_mbps{"));
    }
}
