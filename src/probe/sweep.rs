//! Multi-path sweep orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::prober::Prober;
use super::runner::ProbeRunner;
use crate::dialer::DialerConfig;
use crate::error::{Error, Result};
use crate::types::{Outcome, PathSpec};

/// How a sweep walks the path set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPolicy {
    /// One path at a time, in configuration order. Concurrent probes on a
    /// shared physical link bias each other's throughput numbers, so this is
    /// the default.
    #[default]
    Serial,
    /// All paths at once. Faster wall clock, cross-path interference accepted.
    Parallel,
}

/// Sweep-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Execution policy.
    #[serde(default)]
    pub policy: SweepPolicy,

    /// Dialer tuning shared by every path.
    #[serde(default)]
    pub dialer: DialerConfig,
}

/// Iterates the enabled path set and produces one [`Outcome`] per path,
/// regardless of individual failures.
pub struct SweepOrchestrator {
    paths: Vec<PathSpec>,
    runner: ProbeRunner,
    policy: SweepPolicy,
}

impl SweepOrchestrator {
    /// Build an orchestrator over the enabled subset of `paths`.
    ///
    /// Fails with [`Error::NoEnabledPaths`] if nothing is enabled.
    pub fn new(paths: Vec<PathSpec>, prober: Arc<dyn Prober>, config: SweepConfig) -> Result<Self> {
        let enabled: Vec<PathSpec> = paths.into_iter().filter(|p| p.enabled).collect();
        if enabled.is_empty() {
            return Err(Error::NoEnabledPaths);
        }

        Ok(Self {
            paths: enabled,
            runner: ProbeRunner::new(prober, config.dialer),
            policy: config.policy,
        })
    }

    /// The enabled paths this orchestrator sweeps.
    pub fn paths(&self) -> &[PathSpec] {
        &self.paths
    }

    /// Probe every enabled path and return one outcome per path.
    ///
    /// Serial policy preserves configuration order and stops starting new
    /// probes once `cancel` fires, returning the outcomes collected so far
    /// inside [`Error::SweepCancelled`]. Parallel policy launches every path
    /// up front; launched probes run to completion even across cancellation.
    pub async fn run_all(&self, cancel: &CancellationToken) -> Result<Vec<Outcome>> {
        info!(paths = self.paths.len(), policy = ?self.policy, "starting sweep");
        match self.policy {
            SweepPolicy::Serial => self.run_serial(cancel).await,
            SweepPolicy::Parallel => self.run_parallel(cancel).await,
        }
    }

    /// Probe a single enabled path by name.
    pub async fn run_by_name(&self, cancel: &CancellationToken, name: &str) -> Result<Outcome> {
        let spec = self
            .paths
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::PathNotFound(name.to_string()))?;

        Ok(self.runner.run(cancel, spec).await)
    }

    async fn run_serial(&self, cancel: &CancellationToken) -> Result<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(self.paths.len());

        for spec in &self.paths {
            if cancel.is_cancelled() {
                return Err(Error::SweepCancelled {
                    completed: outcomes,
                });
            }
            outcomes.push(self.runner.run(cancel, spec).await);
        }

        Ok(outcomes)
    }

    async fn run_parallel(&self, cancel: &CancellationToken) -> Result<Vec<Outcome>> {
        let mut set = JoinSet::new();

        for spec in self.paths.iter().cloned() {
            let runner = self.runner.clone();
            let cancel = cancel.clone();
            set.spawn(async move { runner.run(&cancel, &spec).await });
        }

        let mut by_path: HashMap<String, Outcome> = HashMap::with_capacity(self.paths.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    by_path.insert(outcome.path.clone(), outcome);
                }
                Err(e) => error!(error = %e, "probe task failed to join"),
            }
        }

        // One outcome per requested path, no drops, no duplicates; a task
        // that failed to join still yields a failure outcome for its path.
        let outcomes = self
            .paths
            .iter()
            .map(|spec| {
                by_path.remove(&spec.name).unwrap_or_else(|| {
                    Outcome::failure(spec, chrono::Utc::now(), "probe task failed")
                })
            })
            .collect();

        Ok(outcomes)
    }
}
