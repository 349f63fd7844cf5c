//! Request-id keyed reply correlation
//!
//! In the bus topology every worker reply for every round arrives on the same
//! result subject. The mailbox routes each reply to the round that owns its
//! `request_id`:
//!
//! 1. The round calls [`Mailbox::open`] *before* publishing its task, so no
//!    reply can arrive unrouted.
//! 2. The router task feeds every decoded reply to [`Mailbox::deliver`].
//! 3. The round drains its [`MailboxGuard`] until the deadline.
//! 4. Dropping the guard closes the entry; late replies for that id are
//!    discarded.
//!
//! Per-round queues are unbounded. A round's reply count is bounded by the
//! number of subscribed workers and the queue is freed when the round ends,
//! so no reply that arrives before the deadline is ever lost.

use super::Subscription;
use crate::distributed::protocol::{decode_payload, WorkerOutcome};
use crate::error::OracleError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<WorkerOutcome>>>>;

/// Shared routing table of in-flight rounds
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    routes: Routes,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `request_id` for one round
    pub fn open(&self, request_id: &str) -> Result<MailboxGuard, OracleError> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.contains_key(request_id) {
            return Err(OracleError::DuplicateRequest(request_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(request_id.to_string(), tx);

        Ok(MailboxGuard {
            request_id: request_id.to_string(),
            receiver: rx,
            routes: Arc::clone(&self.routes),
        })
    }

    /// Route one reply; false when no round owns its id
    pub fn deliver(&self, outcome: WorkerOutcome) -> bool {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(sender) = routes.get(&outcome.request_id) else {
            log::debug!(
                "Discarding reply from {} for closed or unknown round {}",
                outcome.worker_id,
                outcome.request_id
            );
            return false;
        };

        sender.send(outcome).is_ok()
    }

    /// Number of rounds currently holding an entry
    pub fn in_flight(&self) -> usize {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Decode every payload on `results` and deliver it, until the subscription ends
    pub fn spawn_router(&self, mut results: Subscription) -> JoinHandle<()> {
        let mailbox = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = results.next().await {
                match decode_payload::<WorkerOutcome>(&payload) {
                    Ok(outcome) => {
                        mailbox.deliver(outcome);
                    }
                    Err(e) => log::warn!("Ignoring malformed reply on {}: {:#}", results.subject(), e),
                }
            }
            log::info!("Result subscription {} closed, router stopping", results.subject());
        })
    }
}

/// One round's claim on its request id
#[derive(Debug)]
pub struct MailboxGuard {
    request_id: String,
    receiver: mpsc::UnboundedReceiver<WorkerOutcome>,
    routes: Routes,
}

impl MailboxGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next reply for this round
    pub async fn recv(&mut self) -> Option<WorkerOutcome> {
        self.receiver.recv().await
    }

    /// Next already-buffered reply, without waiting
    pub fn try_recv(&mut self) -> Option<WorkerOutcome> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for MailboxGuard {
    fn drop(&mut self) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}
