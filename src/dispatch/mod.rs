//! Round dispatch
//!
//! A round has one collection window. It opens when the task goes out and
//! closes at the earliest of:
//!
//! - every dispatched worker has answered (direct topology only)
//! - the round deadline, `min(caller deadline, now + round_timeout)`
//! - the caller cancels the round
//!
//! Outcomes that arrive after the window closes are discarded. In-flight
//! worker calls are aborted when the window closes; workers that never
//! answered are simply absent from the outcome list unless timeout synthesis
//! is enabled, in which case each silent target gets an explicit `timeout`
//! outcome.
//!
//! # Direct fan-out
//!
//! ```text
//! targets ──spawn──► call(w1) ──┐
//!          ──spawn──► call(w2) ──┼──► mpsc ──► collect until window closes
//!          ──spawn──► call(w3) ──┘
//! ```

use crate::bus::MailboxGuard;
use crate::distributed::protocol::{OracleRequest, WorkerOutcome};
use crate::error::WorkerFailure;
use crate::registry::WorkerRecord;
use crate::worker::WorkerProxy;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

/// Caller-side bounds on a round: an optional deadline and an optional cancel signal
#[derive(Debug, Clone, Default)]
pub struct RoundContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`RoundContext`] derived from it
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace succeeds even with no live receivers
        self.sender.send_replace(true);
    }
}

impl RoundContext {
    /// No caller deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// Caller deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a cancel signal; returns the handle that triggers it
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel = Some(receiver);
        (self, CancelHandle { sender })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Effective window close time for a round started now
    pub fn round_deadline(&self, round_timeout: Duration) -> Instant {
        let own = Instant::now() + round_timeout;
        match self.deadline {
            Some(caller) => caller.min(own),
            None => own,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Resolves once the round is cancelled; pending forever otherwise
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.cancel {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Why a collection window closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClose {
    /// Every dispatched worker answered
    Complete,
    Deadline,
    Cancelled,
}

/// What a round collected
#[derive(Debug, Clone)]
pub struct Collected {
    /// Arrival order
    pub outcomes: Vec<WorkerOutcome>,
    pub closed_by: WindowClose,
    pub elapsed: Duration,
}

/// Fans a request out and gathers outcomes inside the round window
pub struct Dispatcher {
    proxy: Arc<dyn WorkerProxy>,
    synthesize_timeouts: bool,
}

impl Dispatcher {
    pub fn new(proxy: Arc<dyn WorkerProxy>) -> Self {
        Self {
            proxy,
            synthesize_timeouts: false,
        }
    }

    /// Append an explicit `timeout` outcome for every silent target when the deadline closes a round
    pub fn with_timeout_synthesis(mut self, enabled: bool) -> Self {
        self.synthesize_timeouts = enabled;
        self
    }

    /// Call every target concurrently and collect until the window closes
    pub async fn dispatch(
        &self,
        ctx: &RoundContext,
        targets: &[WorkerRecord],
        request: &OracleRequest,
        round_timeout: Duration,
    ) -> Collected {
        let start = Instant::now();
        let deadline = ctx.round_deadline(round_timeout);

        let (tx, mut rx) = mpsc::channel(targets.len().max(1));
        let mut calls = JoinSet::new();
        for target in targets {
            let proxy = Arc::clone(&self.proxy);
            let target = target.clone();
            let request = request.clone();
            let tx = tx.clone();
            calls.spawn(async move {
                let outcome = proxy.call(&target, &request).await;
                // Receiver gone means the window already closed
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(targets.len());
        let closed_by = loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(outcome) => {
                        log_outcome(&outcome);
                        outcomes.push(outcome);
                    }
                    None => break WindowClose::Complete,
                },
                _ = sleep_until(deadline) => break WindowClose::Deadline,
                _ = ctx.cancelled() => break WindowClose::Cancelled,
            }
        };

        // Abort every call still in flight
        calls.abort_all();

        match closed_by {
            WindowClose::Complete => {}
            WindowClose::Deadline => log::warn!(
                "⏰ Round {} closed at deadline with {}/{} responses",
                request.id,
                outcomes.len(),
                targets.len()
            ),
            WindowClose::Cancelled => log::warn!(
                "🛑 Round {} cancelled with {}/{} responses",
                request.id,
                outcomes.len(),
                targets.len()
            ),
        }

        let elapsed = start.elapsed();
        if self.synthesize_timeouts && closed_by == WindowClose::Deadline {
            let answered: HashSet<String> = outcomes.iter().map(|o| o.worker_id.clone()).collect();
            for target in targets.iter().filter(|t| !answered.contains(&t.id)) {
                outcomes.push(WorkerOutcome::failure(
                    &target.id,
                    &request.id,
                    WorkerFailure::Timeout,
                    elapsed,
                ));
            }
        }

        Collected {
            outcomes,
            closed_by,
            elapsed,
        }
    }
}

/// Drain a round's mailbox until the window closes
///
/// The bus topology has no target list, so the window only closes on the
/// deadline or on cancellation.
pub async fn collect_replies(
    ctx: &RoundContext,
    mailbox: &mut MailboxGuard,
    round_timeout: Duration,
) -> Collected {
    let start = Instant::now();
    let deadline = ctx.round_deadline(round_timeout);
    let mut outcomes = Vec::new();

    let closed_by = loop {
        tokio::select! {
            biased;
            received = mailbox.recv() => match received {
                Some(outcome) => {
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                // Unreachable while the guard holds the route, kept for completeness
                None => break WindowClose::Complete,
            },
            _ = sleep_until(deadline) => break WindowClose::Deadline,
            _ = ctx.cancelled() => break WindowClose::Cancelled,
        }
    };

    if closed_by == WindowClose::Cancelled {
        log::warn!("🛑 Round {} cancelled with {} responses", mailbox.request_id(), outcomes.len());
    } else {
        log::debug!("Round {} window closed with {} responses", mailbox.request_id(), outcomes.len());
    }

    Collected {
        outcomes,
        closed_by,
        elapsed: start.elapsed(),
    }
}

fn log_outcome(outcome: &WorkerOutcome) {
    match &outcome.err {
        None => log::info!(
            "📥 {} → {} = {:.4} ({:?})",
            outcome.worker_id,
            outcome.request_id,
            outcome.value,
            outcome.response_time
        ),
        Some(err) => log::warn!(
            "❌ {} → {} failed: {} ({:?})",
            outcome.worker_id,
            outcome.request_id,
            err,
            outcome.response_time
        ),
    }
}
