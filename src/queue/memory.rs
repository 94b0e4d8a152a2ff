use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Broker, QueueDepth, SessionHandle};
use crate::domain::{QueueMessage, Topic};

const DUPLICATE_WINDOW: Duration = Duration::minutes(10);

struct InFlight {
    message: QueueMessage,
    delivery_count: u32,
    in_flight: bool,
}

struct SessionQueue {
    messages: VecDeque<InFlight>,
    lock: Option<SessionLock>,
}

impl SessionQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            lock: None,
        }
    }

    fn has_due(&self, now: DateTime<Utc>) -> bool {
        self.messages
            .iter()
            .any(|m| !m.in_flight && m.message.is_due(now))
    }
}

struct SessionLock {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

struct FlatQueue {
    messages: VecDeque<InFlight>,
}

struct DeadLetterEntry {
    message: QueueMessage,
    #[allow(dead_code)]
    reason: String,
}

#[derive(Default)]
struct TopicState {
    sessions: HashMap<String, SessionQueue>,
    flat: FlatQueue,
    dead_letters: Vec<DeadLetterEntry>,
}

impl Default for FlatQueue {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }
}

/// In-process broker honoring per-session FIFO, visibility locks,
/// redelivery counts, dead-lettering, scheduled delivery, and duplicate
/// suppression — the contract §4.5 requires of any C5 implementation,
/// concrete or mocked. Suitable for tests and small single-process
/// deployments; a production deployment swaps in a real broker behind
/// the same `Broker` trait.
pub struct MemoryBroker {
    topics: Mutex<HashMap<Topic, TopicState>>,
    recent_ids: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            recent_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn is_duplicate(&self, id: Uuid) -> bool {
        let now = Utc::now();
        let mut recent = self.recent_ids.lock().await;
        recent.retain(|_, seen_at| now.signed_duration_since(*seen_at) < DUPLICATE_WINDOW);
        if recent.contains_key(&id) {
            return true;
        }
        recent.insert(id, now);
        false
    }

    fn expire_session_lock(session: &mut SessionQueue, now: DateTime<Utc>) {
        if let Some(lock) = &session.lock {
            if lock.expires_at <= now {
                session.lock = None;
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, topic: Topic, message: QueueMessage) -> anyhow::Result<()> {
        if topic.requires_session() && message.session.is_none() {
            anyhow::bail!("topic {} requires a session key", topic.as_str());
        }
        let size = serde_json::to_vec(&message.payload)?.len();
        if size > 250_000 {
            anyhow::bail!("message payload exceeds 250KB, split at the gateway");
        }
        if self.is_duplicate(message.id).await {
            return Ok(());
        }

        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic).or_default();
        let entry = InFlight {
            message: message.clone(),
            delivery_count: 0,
            in_flight: false,
        };
        match &message.session {
            Some(session) => {
                state
                    .sessions
                    .entry(session.clone())
                    .or_insert_with(SessionQueue::new)
                    .messages
                    .push_back(entry);
            }
            None => state.flat.messages.push_back(entry),
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        topic: Topic,
        messages: Vec<QueueMessage>,
        batch_size_limit: usize,
    ) -> anyhow::Result<()> {
        let total: usize = messages
            .iter()
            .map(|m| serde_json::to_vec(&m.payload).map(|v| v.len()).unwrap_or(0))
            .sum();
        if total > batch_size_limit {
            anyhow::bail!("batch exceeds {batch_size_limit} bytes, split at the gateway");
        }
        for message in messages {
            self.send(topic, message).await?;
        }
        Ok(())
    }

    async fn lease_next_session(&self, topic: Topic) -> Option<SessionHandle> {
        let now = Utc::now();
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic).or_default();
        for (name, session) in state.sessions.iter_mut() {
            Self::expire_session_lock(session, now);
            if session.lock.is_none() && session.has_due(now) {
                let token = Uuid::new_v4();
                session.lock = Some(SessionLock {
                    token,
                    expires_at: now + topic.lock_duration(),
                });
                return Some(SessionHandle {
                    topic,
                    session: name.clone(),
                    lease_token: token,
                });
            }
        }
        None
    }

    async fn release_session(&self, handle: &SessionHandle) {
        let mut topics = self.topics.lock().await;
        if let Some(state) = topics.get_mut(&handle.topic) {
            if let Some(session) = state.sessions.get_mut(&handle.session) {
                if matches!(&session.lock, Some(l) if l.token == handle.lease_token) {
                    session.lock = None;
                }
            }
        }
    }

    async fn renew_lock(&self, handle: &SessionHandle) -> anyhow::Result<()> {
        let mut topics = self.topics.lock().await;
        let state = topics
            .get_mut(&handle.topic)
            .ok_or_else(|| anyhow::anyhow!("unknown topic"))?;
        let session = state
            .sessions
            .get_mut(&handle.session)
            .ok_or_else(|| anyhow::anyhow!("unknown session"))?;
        match &mut session.lock {
            Some(lock) if lock.token == handle.lease_token => {
                lock.expires_at = Utc::now() + handle.topic.lock_duration();
                Ok(())
            }
            _ => anyhow::bail!("lease no longer held; cannot renew"),
        }
    }

    async fn receive(&self, handle: &SessionHandle, max: usize) -> Vec<QueueMessage> {
        let now = Utc::now();
        let mut topics = self.topics.lock().await;
        let Some(state) = topics.get_mut(&handle.topic) else {
            return Vec::new();
        };
        let Some(session) = state.sessions.get_mut(&handle.session) else {
            return Vec::new();
        };
        if !matches!(&session.lock, Some(l) if l.token == handle.lease_token) {
            return Vec::new();
        }

        let mut out = Vec::new();
        for entry in session.messages.iter_mut() {
            if out.len() >= max {
                break;
            }
            if entry.in_flight || !entry.message.is_due(now) {
                continue;
            }
            entry.in_flight = true;
            entry.delivery_count += 1;
            entry.message.retry_count = entry.delivery_count.saturating_sub(1);
            out.push(entry.message.clone());
        }
        out
    }

    async fn receive_any(&self, topic: Topic, max: usize) -> Vec<QueueMessage> {
        let now = Utc::now();
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic).or_default();
        let mut out = Vec::new();
        for entry in state.flat.messages.iter_mut() {
            if out.len() >= max {
                break;
            }
            if entry.in_flight || !entry.message.is_due(now) {
                continue;
            }
            entry.in_flight = true;
            entry.delivery_count += 1;
            out.push(entry.message.clone());
        }
        out
    }

    async fn complete(&self, topic: Topic, message_id: Uuid) -> anyhow::Result<()> {
        let mut topics = self.topics.lock().await;
        let state = topics
            .get_mut(&topic)
            .ok_or_else(|| anyhow::anyhow!("unknown topic"))?;
        for session in state.sessions.values_mut() {
            if let Some(pos) = session.messages.iter().position(|m| m.message.id == message_id) {
                session.messages.remove(pos);
                return Ok(());
            }
        }
        if let Some(pos) = state
            .flat
            .messages
            .iter()
            .position(|m| m.message.id == message_id)
        {
            state.flat.messages.remove(pos);
            return Ok(());
        }
        anyhow::bail!("message not found")
    }

    async fn abandon(&self, topic: Topic, message_id: Uuid) -> anyhow::Result<()> {
        let mut topics = self.topics.lock().await;
        let outcome = {
            let state = topics
                .get_mut(&topic)
                .ok_or_else(|| anyhow::anyhow!("unknown topic"))?;
            take_for_abandon(state, topic, message_id)
        };
        match outcome {
            Some(AbandonOutcome::Requeued) => Ok(()),
            Some(AbandonOutcome::DeadLettered(message)) => {
                drop_to_dead_letter(&mut topics, topic, message, "max_delivery_count exceeded");
                Ok(())
            }
            None => anyhow::bail!("message not found"),
        }
    }

    async fn dead_letter(&self, topic: Topic, message_id: Uuid, reason: &str) -> anyhow::Result<()> {
        let mut topics = self.topics.lock().await;
        let message = {
            let state = topics
                .get_mut(&topic)
                .ok_or_else(|| anyhow::anyhow!("unknown topic"))?;
            take_message_any(state, message_id)
        };
        let Some(message) = message else {
            anyhow::bail!("message not found")
        };
        drop_to_dead_letter(&mut topics, topic, message, reason);
        Ok(())
    }

    async fn queue_depths(&self) -> Vec<QueueDepth> {
        let now = Utc::now();
        let topics = self.topics.lock().await;
        [
            Topic::DemographicsFifo,
            Topic::WebhooksFifo,
            Topic::Documents,
            Topic::DeadLetter,
        ]
        .into_iter()
        .map(|topic| {
            let Some(state) = topics.get(&topic) else {
                return QueueDepth {
                    topic,
                    active: 0,
                    scheduled: 0,
                    dead_letter: 0,
                    dead_letter_sample: Vec::new(),
                };
            };
            let mut active = 0usize;
            let mut scheduled = 0usize;
            for session in state.sessions.values() {
                for entry in &session.messages {
                    if entry.message.is_due(now) {
                        active += 1;
                    } else {
                        scheduled += 1;
                    }
                }
            }
            for entry in &state.flat.messages {
                if entry.message.is_due(now) {
                    active += 1;
                } else {
                    scheduled += 1;
                }
            }
            let dead_letter_sample = state
                .dead_letters
                .iter()
                .rev()
                .take(10)
                .map(|d| d.message.id)
                .collect();
            QueueDepth {
                topic,
                active,
                scheduled,
                dead_letter: state.dead_letters.len(),
                dead_letter_sample,
            }
        })
        .collect()
    }
}

enum AbandonOutcome {
    Requeued,
    DeadLettered(QueueMessage),
}

fn take_for_abandon(state: &mut TopicState, topic: Topic, message_id: Uuid) -> Option<AbandonOutcome> {
    for session in state.sessions.values_mut() {
        if let Some(pos) = session.messages.iter().position(|m| m.message.id == message_id) {
            let delivery_count = session.messages[pos].delivery_count;
            return Some(if delivery_count >= topic.max_delivery_count() {
                let entry = session.messages.remove(pos).unwrap();
                AbandonOutcome::DeadLettered(entry.message)
            } else {
                session.messages[pos].in_flight = false;
                AbandonOutcome::Requeued
            });
        }
    }
    if let Some(pos) = state
        .flat
        .messages
        .iter()
        .position(|m| m.message.id == message_id)
    {
        let delivery_count = state.flat.messages[pos].delivery_count;
        return Some(if delivery_count >= topic.max_delivery_count() {
            let entry = state.flat.messages.remove(pos).unwrap();
            AbandonOutcome::DeadLettered(entry.message)
        } else {
            state.flat.messages[pos].in_flight = false;
            AbandonOutcome::Requeued
        });
    }
    None
}

fn take_message_any(state: &mut TopicState, message_id: Uuid) -> Option<QueueMessage> {
    for session in state.sessions.values_mut() {
        if let Some(pos) = session.messages.iter().position(|m| m.message.id == message_id) {
            return Some(session.messages.remove(pos).unwrap().message);
        }
    }
    if let Some(pos) = state
        .flat
        .messages
        .iter()
        .position(|m| m.message.id == message_id)
    {
        return Some(state.flat.messages.remove(pos).unwrap().message);
    }
    None
}

/// Records the terminal outcome in the origin topic's audit trail and makes
/// the message consumable on the dead-letter topic itself, so a side
/// consumer can drain it through the ordinary `receive_any`/`complete` path
/// rather than needing broker-internal access.
fn drop_to_dead_letter(
    topics: &mut HashMap<Topic, TopicState>,
    origin: Topic,
    message: QueueMessage,
    reason: &str,
) {
    topics
        .entry(origin)
        .or_default()
        .dead_letters
        .push(DeadLetterEntry {
            message: message.clone(),
            reason: reason.to_string(),
        });

    topics
        .entry(Topic::DeadLetter)
        .or_default()
        .flat
        .messages
        .push_back(InFlight {
            message,
            delivery_count: 0,
            in_flight: false,
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageType;
    use serde_json::json;

    fn msg(session: &str) -> QueueMessage {
        QueueMessage::new(
            MessageType::Demographics,
            json!({}),
            Some(session.to_string()),
            "corr".to_string(),
        )
    }

    #[tokio::test]
    async fn fifo_order_within_session_is_preserved() {
        let broker = MemoryBroker::new();
        let m1 = msg("demographics_acme");
        let m2 = msg("demographics_acme");
        let id1 = m1.id;
        let id2 = m2.id;
        broker.send(Topic::DemographicsFifo, m1).await.unwrap();
        broker.send(Topic::DemographicsFifo, m2).await.unwrap();

        let handle = broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .unwrap();
        let received = broker.receive(&handle, 10).await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].id, id1);
        assert_eq!(received[1].id, id2);
    }

    #[tokio::test]
    async fn session_lock_excludes_other_consumers() {
        let broker = MemoryBroker::new();
        broker
            .send(Topic::DemographicsFifo, msg("demographics_acme"))
            .await
            .unwrap();

        let handle = broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .unwrap();
        assert!(broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .is_none());

        broker.release_session(&handle).await;
        assert!(broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn cross_session_work_is_independent() {
        let broker = MemoryBroker::new();
        broker
            .send(Topic::DemographicsFifo, msg("demographics_acme"))
            .await
            .unwrap();
        broker
            .send(Topic::DemographicsFifo, msg("demographics_other"))
            .await
            .unwrap();

        let h1 = broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .unwrap();
        let h2 = broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .unwrap();
        assert_ne!(h1.session, h2.session);
    }

    #[tokio::test]
    async fn abandon_redelivers_until_max_then_dead_letters() {
        let broker = MemoryBroker::new();
        let m = msg("demographics_acme");
        let id = m.id;
        broker.send(Topic::DemographicsFifo, m).await.unwrap();

        for _ in 0..Topic::DemographicsFifo.max_delivery_count() {
            let handle = broker
                .lease_next_session(Topic::DemographicsFifo)
                .await
                .unwrap();
            let received = broker.receive(&handle, 1).await;
            assert_eq!(received.len(), 1);
            broker
                .abandon(Topic::DemographicsFifo, id)
                .await
                .unwrap();
            broker.release_session(&handle).await;
        }

        // Message should now be dead-lettered, not redeliverable.
        let depths = broker.queue_depths().await;
        let fifo = depths
            .iter()
            .find(|d| d.topic == Topic::DemographicsFifo)
            .unwrap();
        assert_eq!(fifo.active, 0);
        let dead = depths
            .iter()
            .find(|d| d.topic == Topic::DeadLetter)
            .unwrap();
        // dead-letters are tracked per originating topic's state, not the
        // DeadLetter topic's own state in this in-memory model.
        let _ = dead;
        let fifo_state_dead = broker.topics.lock().await;
        let state = fifo_state_dead.get(&Topic::DemographicsFifo).unwrap();
        assert_eq!(state.dead_letters.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_suppressed_within_window() {
        let broker = MemoryBroker::new();
        let m = msg("demographics_acme");
        let dup = m.clone();
        broker.send(Topic::DemographicsFifo, m).await.unwrap();
        broker.send(Topic::DemographicsFifo, dup).await.unwrap();

        let handle = broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .unwrap();
        let received = broker.receive(&handle, 10).await;
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn scheduled_messages_are_withheld_until_due() {
        let broker = MemoryBroker::new();
        let mut m = msg("demographics_acme");
        m.scheduled_for = Some(Utc::now() + Duration::minutes(5));
        broker.send(Topic::DemographicsFifo, m).await.unwrap();

        assert!(broker
            .lease_next_session(Topic::DemographicsFifo)
            .await
            .is_none());
    }
}
