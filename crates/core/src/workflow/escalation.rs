//! Escalation scheduler: periodic sweep over stalled steps.
//!
//! The sweep only finds candidates. Each escalation goes through
//! [`WorkflowEngine::escalate_step`], which re-checks the timeout against
//! fresh state and commits with compare-and-swap like any user action.
//! A run-lock keeps sweeps from overlapping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use flowgate_shared::types::StepId;

use crate::workflow::engine::WorkflowEngine;
use crate::workflow::types::WorkflowRequest;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active requests inspected.
    pub scanned: usize,
    /// Steps escalated by this sweep.
    pub escalated: usize,
    /// Candidates that were no longer overdue on reload.
    pub already_handled: usize,
    /// Candidates whose escalation failed.
    pub failed: usize,
    /// True if another sweep held the run-lock.
    pub skipped: bool,
}

/// Periodically escalates overdue steps.
pub struct EscalationScheduler {
    engine: Arc<WorkflowEngine>,
    interval: Duration,
    run_lock: Mutex<()>,
}

impl EscalationScheduler {
    /// Creates a scheduler sweeping every `interval`.
    pub fn new(engine: Arc<WorkflowEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            run_lock: Mutex::new(()),
        }
    }

    /// Steps of `request` that are pending in the active stage past their timeout.
    pub fn overdue_steps(request: &WorkflowRequest, now: DateTime<Utc>) -> Vec<StepId> {
        if !request.status.is_actionable() {
            return Vec::new();
        }
        request
            .steps
            .iter()
            .filter(|s| s.order == request.current_step && s.is_overdue(now))
            .map(|s| s.id)
            .collect()
    }

    /// Runs one sweep, or returns a skipped report if one is already running.
    pub async fn sweep(&self) -> SweepReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::debug!("escalation sweep already running, skipping");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        };

        let mut report = SweepReport::default();
        let requests = match self.engine.active_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                tracing::error!(error = %e, "escalation sweep could not list requests");
                report.failed += 1;
                return report;
            }
        };

        let now = self.engine.now();
        report.scanned = requests.len();
        for request in &requests {
            for step_id in Self::overdue_steps(request, now) {
                match self.engine.escalate_step(request.id, step_id).await {
                    Ok(Some(_)) => report.escalated += 1,
                    Ok(None) => report.already_handled += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            request_id = %request.id,
                            step_id = %step_id,
                            error = %e,
                            "escalation failed"
                        );
                    }
                }
            }
        }

        if report.escalated > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                escalated = report.escalated,
                already_handled = report.already_handled,
                failed = report.failed,
                "escalation sweep finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "escalation sweep finished");
        }
        report
    }

    /// Sweeps on every tick until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "escalation scheduler started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("escalation scheduler stopped");
    }

    /// Spawns [`Self::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
