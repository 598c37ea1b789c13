//! The measurement capability consumed by the probe runner.

use async_trait::async_trait;

use crate::dialer::BoundDialer;
use crate::error::Result;
use crate::types::ServerCandidate;

/// Latency sub-measurement result.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    /// Round-trip latency in milliseconds.
    pub latency_ms: f64,
    /// Jitter (mean absolute difference between successive samples) in ms.
    pub jitter_ms: f64,
    /// Percentage of latency samples that got no reply.
    pub loss_pct: f64,
}

/// One latency/throughput measurement capability.
///
/// Every method receives the path's [`BoundDialer`] and must open its
/// connections exclusively through it, so the measurement traffic carries the
/// path's source binding and DSCP marking. Implementations do not retry; the
/// runner decides how failures degrade.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Find candidate measurement servers, best-ranked first.
    ///
    /// An empty list is a valid answer ("nothing reachable"); the runner
    /// turns it into a failed outcome.
    async fn discover_servers(&self, dialer: &BoundDialer) -> Result<Vec<ServerCandidate>>;

    /// Measure round-trip latency against one server.
    async fn measure_latency(
        &self,
        server: &ServerCandidate,
        dialer: &BoundDialer,
    ) -> Result<LatencyStats>;

    /// Measure download throughput in Mbps against one server.
    async fn measure_download(&self, server: &ServerCandidate, dialer: &BoundDialer)
        -> Result<f64>;

    /// Measure upload throughput in Mbps against one server.
    async fn measure_upload(&self, server: &ServerCandidate, dialer: &BoundDialer) -> Result<f64>;
}
