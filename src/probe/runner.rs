//! Per-path probe execution.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::prober::Prober;
use crate::dialer::{BoundDialer, DialerConfig};
use crate::error::Error;
use crate::types::{Outcome, PathSpec};

/// Runs one prober invocation for one path and folds every failure mode into
/// a structured [`Outcome`]. `run` never returns an error: a misbehaving path
/// must not abort the ambient sweep.
#[derive(Clone)]
pub struct ProbeRunner {
    prober: Arc<dyn Prober>,
    dialer_config: DialerConfig,
}

impl ProbeRunner {
    pub fn new(prober: Arc<dyn Prober>, dialer_config: DialerConfig) -> Self {
        Self {
            prober,
            dialer_config,
        }
    }

    /// Probe one path. Always returns a fully-populated outcome: either the
    /// numeric fields carry the measurement or `error` carries the reason.
    pub async fn run(&self, cancel: &CancellationToken, spec: &PathSpec) -> Outcome {
        let started_at = Utc::now();
        let start = Instant::now();

        info!(path = %spec.name, source = ?spec.source, dscp = spec.dscp, "probing path");

        let mut outcome = self.run_inner(cancel, spec, started_at).await;
        outcome.elapsed = start.elapsed();

        if let Some(ref err) = outcome.error {
            warn!(path = %spec.name, error = %err, "probe failed");
        } else {
            info!(
                path = %spec.name,
                latency_ms = outcome.latency_ms,
                download_mbps = outcome.download_mbps,
                upload_mbps = outcome.upload_mbps,
                elapsed = ?outcome.elapsed,
                "probe complete"
            );
        }

        outcome
    }

    async fn run_inner(
        &self,
        cancel: &CancellationToken,
        spec: &PathSpec,
        started_at: chrono::DateTime<Utc>,
    ) -> Outcome {
        let dialer = match BoundDialer::new(spec, self.dialer_config.clone()) {
            Ok(dialer) => dialer,
            Err(e) => return Outcome::failure(spec, started_at, e.to_string()),
        };

        let servers = match self.prober.discover_servers(&dialer).await {
            Ok(servers) => servers,
            Err(e) => {
                return Outcome::failure(spec, started_at, format!("server discovery: {e}"))
            }
        };

        let Some(best) = servers.into_iter().next() else {
            return Outcome::failure(spec, started_at, Error::NoServerAvailable.to_string());
        };
        debug!(path = %spec.name, server = %best.host, "selected best-ranked server");

        let mut outcome = Outcome {
            path: spec.name.clone(),
            source: spec.source.clone(),
            dscp: spec.dscp,
            server: Some(best.clone()),
            started_at,
            ..Default::default()
        };

        // Sub-measurements are independently best-effort: a failure zeroes
        // the field, it does not fail the outcome. Cancellation is checked
        // before each one.
        if cancel.is_cancelled() {
            return Outcome::failure(spec, started_at, "probe cancelled");
        }
        match self.prober.measure_latency(&best, &dialer).await {
            Ok(stats) => {
                outcome.latency_ms = stats.latency_ms;
                outcome.jitter_ms = stats.jitter_ms;
                outcome.packet_loss_pct = stats.loss_pct;
            }
            Err(e) => warn!(path = %spec.name, error = %e, "latency measurement failed"),
        }

        if cancel.is_cancelled() {
            return Outcome::failure(spec, started_at, "probe cancelled");
        }
        match self.prober.measure_download(&best, &dialer).await {
            Ok(mbps) => outcome.download_mbps = mbps,
            Err(e) => warn!(path = %spec.name, error = %e, "download measurement failed"),
        }

        if cancel.is_cancelled() {
            return Outcome::failure(spec, started_at, "probe cancelled");
        }
        match self.prober.measure_upload(&best, &dialer).await {
            Ok(mbps) => outcome.upload_mbps = mbps,
            Err(e) => warn!(path = %spec.name, error = %e, "upload measurement failed"),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::probe::prober::LatencyStats;
    use crate::types::ServerCandidate;
    use async_trait::async_trait;

    struct NoServersProber;

    #[async_trait]
    impl Prober for NoServersProber {
        async fn discover_servers(&self, _dialer: &BoundDialer) -> Result<Vec<ServerCandidate>> {
            Ok(vec![])
        }
        async fn measure_latency(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<LatencyStats> {
            unreachable!("no servers were discovered")
        }
        async fn measure_download(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<f64> {
            unreachable!("no servers were discovered")
        }
        async fn measure_upload(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<f64> {
            unreachable!("no servers were discovered")
        }
    }

    struct FlakyProber;

    #[async_trait]
    impl Prober for FlakyProber {
        async fn discover_servers(&self, _dialer: &BoundDialer) -> Result<Vec<ServerCandidate>> {
            Ok(vec![ServerCandidate {
                id: "1".into(),
                name: "mock".into(),
                host: "127.0.0.1:1".into(),
                country: String::new(),
                rank_ms: 1.0,
            }])
        }
        async fn measure_latency(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<LatencyStats> {
            Err(Error::Measurement("ping broke".into()))
        }
        async fn measure_download(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<f64> {
            Ok(42.0)
        }
        async fn measure_upload(
            &self,
            _server: &ServerCandidate,
            _dialer: &BoundDialer,
        ) -> Result<f64> {
            Ok(7.0)
        }
    }

    #[tokio::test]
    async fn test_no_servers_is_outcome_failure() {
        let runner = ProbeRunner::new(Arc::new(NoServersProber), DialerConfig::default());
        let outcome = runner
            .run(&CancellationToken::new(), &PathSpec::new("wan1"))
            .await;

        assert!(outcome.is_error());
        assert_eq!(outcome.download_mbps, 0.0);
        assert_eq!(outcome.path, "wan1");
    }

    #[tokio::test]
    async fn test_invalid_dialer_is_outcome_failure() {
        let runner = ProbeRunner::new(Arc::new(NoServersProber), DialerConfig::default());
        let spec = PathSpec::new("wan1").with_dscp(99);
        let outcome = runner.run(&CancellationToken::new(), &spec).await;

        assert!(outcome.is_error());
        assert!(outcome.error.as_deref().unwrap().contains("DSCP"));
    }

    #[tokio::test]
    async fn test_failed_sub_measurement_degrades_to_zero() {
        let runner = ProbeRunner::new(Arc::new(FlakyProber), DialerConfig::default());
        let outcome = runner
            .run(&CancellationToken::new(), &PathSpec::new("wan1"))
            .await;

        assert!(!outcome.is_error());
        assert_eq!(outcome.latency_ms, 0.0);
        assert_eq!(outcome.download_mbps, 42.0);
        assert_eq!(outcome.upload_mbps, 7.0);
    }

    #[tokio::test]
    async fn test_elapsed_recorded_on_failure() {
        let runner = ProbeRunner::new(Arc::new(NoServersProber), DialerConfig::default());
        let outcome = runner
            .run(&CancellationToken::new(), &PathSpec::new("wan1"))
            .await;
        // Wall clock was sampled even though the probe failed immediately.
        assert!(outcome.started_at <= Utc::now());
    }
}
