pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

pub use crate::domain::{MessageType, QueueMessage, Topic};

/// A lease on one FIFO session: at most one `SessionHandle` for a given
/// `(topic, session)` is live at a time, per §3/§4.5.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub topic: Topic,
    pub session: String,
    pub lease_token: Uuid,
}

#[derive(Debug, Clone)]
pub struct QueueDepth {
    pub topic: Topic,
    pub active: usize,
    pub scheduled: usize,
    pub dead_letter: usize,
    pub dead_letter_sample: Vec<Uuid>,
}

/// The C5 conceptual contract: FIFO-with-sessions, visibility locks,
/// redelivery counts, scheduled delivery, dead-lettering, duplicate
/// suppression. The core depends on this trait, not a concrete broker,
/// per §9's "interface abstraction over concrete brokers" design note.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, topic: Topic, message: QueueMessage) -> anyhow::Result<()>;

    async fn send_batch(
        &self,
        topic: Topic,
        messages: Vec<QueueMessage>,
        batch_size_limit: usize,
    ) -> anyhow::Result<()>;

    /// Acquire an unlocked session on a FIFO topic that has at least one
    /// due message, or `None` if none is currently available.
    async fn lease_next_session(&self, topic: Topic) -> Option<SessionHandle>;

    /// Release a session lease without processing further messages on it.
    async fn release_session(&self, handle: &SessionHandle);

    /// Extend a session lease's visibility window; called while a worker
    /// is mid-processing so a long-running session isn't stolen.
    async fn renew_lock(&self, handle: &SessionHandle) -> anyhow::Result<()>;

    /// Pull up to `max` due, not-already-in-flight messages from the
    /// front of a leased session, in FIFO order.
    async fn receive(&self, handle: &SessionHandle, max: usize) -> Vec<QueueMessage>;

    /// Pull up to `max` due messages from a non-FIFO topic. No ordering
    /// guarantee; any number of consumers may call this concurrently.
    async fn receive_any(&self, topic: Topic, max: usize) -> Vec<QueueMessage>;

    async fn complete(&self, topic: Topic, message_id: Uuid) -> anyhow::Result<()>;

    /// Return a message to its queue for redelivery, incrementing its
    /// delivery count. Auto-dead-letters if `max_delivery_count` is
    /// reached.
    async fn abandon(&self, topic: Topic, message_id: Uuid) -> anyhow::Result<()>;

    async fn dead_letter(&self, topic: Topic, message_id: Uuid, reason: &str) -> anyhow::Result<()>;

    async fn queue_depths(&self) -> Vec<QueueDepth>;
}
