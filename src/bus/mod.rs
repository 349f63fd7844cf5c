//! Publish/subscribe message bus
//!
//! The bus topology replaces the registry: the coordinator publishes one task
//! per round on the task subject and every subscribed worker answers on the
//! result subject. Replies are correlated back to their round by request id
//! through the [`mailbox::Mailbox`].
//!
//! Two transports implement [`MessageBus`]:
//!
//! - [`local::LocalBus`]: in-process, for tests and single-binary demos
//! - [`TcpBus`](crate::distributed::broker::TcpBus): a connection to the
//!   broker from `distributed::broker`

pub mod local;
pub mod mailbox;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use local::LocalBus;
pub use mailbox::{Mailbox, MailboxGuard};

/// Subjects used by the oracle network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    pub tasks: String,
    pub results: String,
}

impl Default for Subjects {
    fn default() -> Self {
        Self {
            tasks: "oracle.tasks".to_string(),
            results: "oracle.results".to_string(),
        }
    }
}

/// Subject-addressed fan-out transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `payload` to every current subscriber of `subject`
    ///
    /// Publishing to a subject nobody listens on succeeds.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> crate::Result<()>;

    /// Start receiving messages published on `subject`
    async fn subscribe(&self, subject: &str) -> crate::Result<Subscription>;
}

/// Stream of payloads for one subject
///
/// Dropping the subscription unsubscribes. The queue behind it is unbounded,
/// so a slow reader delays messages but never loses them.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, receiver: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            receiver,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next payload, or `None` once the bus is gone
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}
