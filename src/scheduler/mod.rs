//! Timer-driven sweep coordination.
//!
//! The coordinator owns one timer task that fires on a cron schedule and
//! guarantees at most one sweep in flight at any time, across both timer
//! fires and manual triggers. Overlapping fires are skipped, never queued:
//! sweeps may run longer than the schedule interval and must not pile up.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::probe::SweepOrchestrator;
use crate::types::{Outcome, ScheduleState};

/// Default ceiling on one sweep's duration before it is abandoned.
pub const DEFAULT_SWEEP_CEILING: Duration = Duration::from_secs(600);

/// Receives every completed sweep, exactly once per sweep.
///
/// Persistence and metrics updates live behind this seam; the coordinator
/// invokes it whether or not every individual outcome succeeded.
pub trait ResultSink: Send + Sync {
    fn on_sweep_complete(&self, outcomes: &[Outcome]);
}

/// Sink that logs one line per outcome.
pub struct LogSink;

impl ResultSink for LogSink {
    fn on_sweep_complete(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            if let Some(ref err) = outcome.error {
                warn!(path = %outcome.path, error = %err, "sweep outcome");
            } else {
                info!(
                    path = %outcome.path,
                    latency_ms = outcome.latency_ms,
                    download_mbps = outcome.download_mbps,
                    upload_mbps = outcome.upload_mbps,
                    "sweep outcome"
                );
            }
        }
    }
}

/// Fan-out sink.
pub struct MultiSink(pub Vec<Arc<dyn ResultSink>>);

impl ResultSink for MultiSink {
    fn on_sweep_complete(&self, outcomes: &[Outcome]) {
        for sink in &self.0 {
            sink.on_sweep_complete(outcomes);
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    running: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Fires sweeps on a cron schedule with single-flight semantics.
pub struct ScheduleCoordinator {
    schedule: Schedule,
    expression: String,
    enabled: bool,
    sweep_ceiling: Duration,
    orchestrator: Arc<SweepOrchestrator>,
    sink: Arc<dyn ResultSink>,
    state: Mutex<CoordinatorState>,
    /// Single-flight gate shared by timer fires and manual triggers.
    sweep_gate: Arc<AsyncMutex<()>>,
    sweep_in_flight: AtomicBool,
}

/// Accept 5-field cron expressions by prepending a seconds field; the cron
/// crate itself wants 6 or 7 fields.
fn normalize_expression(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Check that a schedule expression parses, without building a coordinator.
pub fn validate_expression(expression: &str) -> Result<()> {
    Schedule::from_str(&normalize_expression(expression))
        .map(|_| ())
        .map_err(|e| Error::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

impl ScheduleCoordinator {
    /// Parse the schedule expression and build a stopped coordinator.
    pub fn new(
        expression: &str,
        orchestrator: Arc<SweepOrchestrator>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let normalized = normalize_expression(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| Error::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
            enabled: true,
            sweep_ceiling: DEFAULT_SWEEP_CEILING,
            orchestrator,
            sink,
            state: Mutex::new(CoordinatorState::default()),
            sweep_gate: Arc::new(AsyncMutex::new(())),
            sweep_in_flight: AtomicBool::new(false),
        })
    }

    /// Cap the duration of a single sweep; a sweep exceeding the ceiling is
    /// abandoned so a hung probe cannot wedge all future fires.
    pub fn with_sweep_ceiling(mut self, ceiling: Duration) -> Self {
        self.sweep_ceiling = ceiling;
        self
    }

    /// Mark scheduling as administratively disabled; `start` becomes a no-op.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Start the timer task. Fails with [`Error::AlreadyRunning`] if started
    /// twice without an intervening `stop`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(Error::AlreadyRunning);
        }
        if !self.enabled {
            info!("schedule coordinator is disabled in configuration");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { this.timer_loop(task_cancel).await });

        state.running = true;
        state.cancel = Some(cancel);
        state.handle = Some(handle);
        state.next_run = self.schedule.upcoming(Utc).next();

        info!(schedule = %self.expression, next_run = ?state.next_run, "schedule coordinator started");
        Ok(())
    }

    /// Stop the timer and block until any sweep this coordinator launched
    /// has finished. No sweep survives shutdown.
    pub async fn stop(&self) {
        let (cancel, handle) = {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            (state.cancel.take(), state.handle.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Timer-fired sweeps finished with the task; manual triggers hold
        // the gate until they drain.
        let _drain = self.sweep_gate.lock().await;

        // The timer task writes next_run on every iteration, so the field
        // can only be cleared once the task has been joined.
        self.state.lock().next_run = None;

        info!("schedule coordinator stopped");
    }

    /// Manually trigger a sweep. A no-op (returning `false`) when a sweep is
    /// already in flight; never an error.
    pub fn trigger_now(self: &Arc<Self>) -> bool {
        match Arc::clone(&self.sweep_gate).try_lock_owned() {
            Ok(guard) => {
                info!("manual sweep triggered");
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_sweep(guard).await });
                true
            }
            Err(_) => {
                debug!("sweep already in flight, manual trigger skipped");
                false
            }
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ScheduleState {
        let state = self.state.lock();
        ScheduleState {
            enabled: self.enabled,
            schedule: self.expression.clone(),
            running: state.running,
            sweep_in_flight: self.sweep_in_flight.load(Ordering::Relaxed),
            last_run: state.last_run,
            next_run: state.next_run,
        }
    }

    async fn timer_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!(schedule = %self.expression, "schedule has no future fire times");
                break;
            };
            self.state.lock().next_run = Some(next);

            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => self.fire().await,
            }
        }
    }

    /// One timer fire. Skipped entirely if a sweep is still in flight.
    async fn fire(&self) {
        match Arc::clone(&self.sweep_gate).try_lock_owned() {
            Ok(guard) => self.run_sweep(guard).await,
            Err(_) => {
                warn!("previous sweep still running, skipping this fire");
            }
        }
    }

    /// Run one sweep while holding the single-flight gate.
    async fn run_sweep(&self, _gate: OwnedMutexGuard<()>) {
        self.sweep_in_flight.store(true, Ordering::Relaxed);
        self.state.lock().last_run = Some(Utc::now());

        let cancel = CancellationToken::new();
        let result =
            tokio::time::timeout(self.sweep_ceiling, self.orchestrator.run_all(&cancel)).await;

        match result {
            Ok(Ok(outcomes)) => {
                info!(outcomes = outcomes.len(), "sweep complete");
                self.sink.on_sweep_complete(&outcomes);
            }
            Ok(Err(Error::SweepCancelled { completed })) => {
                warn!(completed = completed.len(), "sweep cancelled mid-flight");
            }
            Ok(Err(e)) => error!(error = %e, "sweep failed"),
            Err(_) => {
                // The timeout already dropped the sweep future; nothing is
                // left to signal.
                error!(ceiling = ?self.sweep_ceiling, "sweep exceeded ceiling, abandoned");
            }
        }

        self.sweep_in_flight.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_expression("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn test_five_field_expressions_parse() {
        assert!(Schedule::from_str(&normalize_expression("0 * * * *")).is_ok());
        assert!(Schedule::from_str(&normalize_expression("*/30 * * * *")).is_ok());
    }
}
