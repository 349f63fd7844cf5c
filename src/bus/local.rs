//! In-process message bus

use super::{MessageBus, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Subject fan-out inside one process
///
/// Closed subscribers are pruned on the next publish to their subject.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later publish and subscribe
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn subscriber_count(&self, subject: &str) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers
            .get(subject)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> crate::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("Bus is closed");
        }

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = subscribers.get_mut(subject) {
            senders.retain(|s| !s.is_closed());
            for sender in senders.iter() {
                let _ = sender.send(payload.clone());
            }
        }

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> crate::Result<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("Bus is closed");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        Ok(Subscription::new(subject, rx))
    }
}
