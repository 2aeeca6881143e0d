use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::publisher::{EventPublisher, MessageHandler};
use crate::{PublishError, Result};

/// A message sitting in a queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message_id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
    /// Number of times the message was handed back after a handler failure.
    pub redeliveries: u32,
}

impl QueuedMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// What happened to the message at the head of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The queue was empty or not declared.
    Empty,
    /// Handled and removed.
    Acked,
    /// Handler failed; the message went back to the head of the queue.
    Requeued,
    /// Body did not decode; the message was dropped to the dead letters.
    Rejected,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    dead_letters: Vec<QueuedMessage>,
    declarations: usize,
    fail_on_publish: bool,
}

/// In-process broker with durable named queues and at-least-once
/// consumption.
///
/// Queues are declared lazily by the first publish to a topic and cached
/// afterwards. Used by tests and by services started without `AMQP_URL`.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following publish fail as if the broker were down.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Number of queue declarations performed so far.
    pub async fn declaration_count(&self) -> usize {
        self.state.read().await.declarations
    }

    pub async fn is_declared(&self, topic: &str) -> bool {
        self.state.read().await.queues.contains_key(topic)
    }

    pub async fn len(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .queues
            .get(topic)
            .map_or(0, VecDeque::len)
    }

    /// Copies of the messages waiting on `topic`, oldest first.
    pub async fn peek(&self, topic: &str) -> Vec<QueuedMessage> {
        self.state
            .read()
            .await
            .queues
            .get(topic)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decodes every message waiting on `topic` without consuming it.
    pub async fn decoded<T: DeserializeOwned>(&self, topic: &str) -> Result<Vec<T>> {
        self.peek(topic).await.iter().map(|m| m.decode()).collect()
    }

    pub async fn dead_letters(&self) -> Vec<QueuedMessage> {
        self.state.read().await.dead_letters.clone()
    }

    /// Delivers the head of `topic` to `handler`.
    ///
    /// The message stays in the queue while the handler runs so a failure
    /// or a crash never loses it.
    pub async fn deliver_next<H: MessageHandler>(&self, topic: &str, handler: &H) -> Delivery {
        let head = {
            let state = self.state.read().await;
            match state.queues.get(topic).and_then(|q| q.front()) {
                Some(message) => message.clone(),
                None => return Delivery::Empty,
            }
        };

        let outcome = match head.decode::<H::Message>() {
            Err(e) => {
                tracing::error!(topic, message_id = %head.message_id, error = %e, "undecodable message");
                Delivery::Rejected
            }
            Ok(message) => match handler.handle(message).await {
                Ok(()) => Delivery::Acked,
                Err(e) => {
                    tracing::warn!(topic, message_id = %head.message_id, error = %e, "handler failed, requeueing");
                    Delivery::Requeued
                }
            },
        };

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(queue) = state.queues.get_mut(topic) else {
            return outcome;
        };
        let Some(position) = queue
            .iter()
            .position(|m| m.message_id == head.message_id)
        else {
            return outcome;
        };

        match outcome {
            Delivery::Acked => {
                queue.remove(position);
            }
            Delivery::Requeued => {
                if let Some(mut message) = queue.remove(position) {
                    message.redeliveries += 1;
                    queue.push_front(message);
                }
            }
            Delivery::Rejected => {
                if let Some(message) = queue.remove(position) {
                    state.dead_letters.push(message);
                }
            }
            Delivery::Empty => {}
        }

        outcome
    }

    /// Delivers until the queue is empty or a message is requeued.
    /// Returns the number of acknowledged messages.
    pub async fn drain<H: MessageHandler>(&self, topic: &str, handler: &H) -> usize {
        let mut acked = 0;
        loop {
            match self.deliver_next(topic, handler).await {
                Delivery::Acked => acked += 1,
                Delivery::Rejected => {}
                Delivery::Empty | Delivery::Requeued => return acked,
            }
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_publish {
            return Err(PublishError::Connection("broker unavailable".to_string()));
        }

        if !state.queues.contains_key(topic) {
            state.queues.insert(topic.to_string(), VecDeque::new());
            state.declarations += 1;
            tracing::debug!(topic, "declared durable queue");
        }

        let message = QueuedMessage {
            message_id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
            redeliveries: 0,
        };

        if let Some(queue) = state.queues.get_mut(topic) {
            queue.push_back(message);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::HandlerError;
    use crate::publisher::EventPublisherExt;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    /// Fails the first `failures` deliveries, then succeeds.
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyHandler {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        type Message = Ping;

        async fn handle(&self, _message: Ping) -> std::result::Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(HandlerError::new("transient"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn queue_is_declared_once() {
        let broker = InMemoryBroker::new();
        assert!(!broker.is_declared("t").await);

        broker.publish("t", &Ping { seq: 1 }).await.unwrap();
        broker.publish("t", &Ping { seq: 2 }).await.unwrap();

        assert!(broker.is_declared("t").await);
        assert_eq!(broker.declaration_count().await, 1);
        assert_eq!(broker.len("t").await, 2);
    }

    #[tokio::test]
    async fn publish_order_is_preserved_within_a_queue() {
        let broker = InMemoryBroker::new();
        for seq in 0..5 {
            broker.publish("t", &Ping { seq }).await.unwrap();
        }
        let seen: Vec<Ping> = broker.decoded("t").await.unwrap();
        assert_eq!(seen.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_handler_requeues_same_message() {
        let broker = InMemoryBroker::new();
        broker.publish("t", &Ping { seq: 1 }).await.unwrap();
        let handler = FlakyHandler::new(1);

        assert_eq!(broker.deliver_next("t", &handler).await, Delivery::Requeued);
        let head = broker.peek("t").await;
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].redeliveries, 1);

        assert_eq!(broker.deliver_next("t", &handler).await, Delivery::Acked);
        assert_eq!(broker.len("t").await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_body_is_rejected() {
        let broker = InMemoryBroker::new();
        broker.publish_raw("t", b"not json".to_vec()).await.unwrap();
        broker.publish("t", &Ping { seq: 2 }).await.unwrap();

        let handler = FlakyHandler::new(0);
        assert_eq!(broker.drain("t", &handler).await, 1);
        assert_eq!(broker.dead_letters().await.len(), 1);
        assert_eq!(broker.len("t").await, 0);
    }

    #[tokio::test]
    async fn empty_queue_delivers_nothing() {
        let broker = InMemoryBroker::new();
        let handler = FlakyHandler::new(0);
        assert_eq!(broker.deliver_next("missing", &handler).await, Delivery::Empty);
    }

    #[tokio::test]
    async fn publish_fails_when_broker_down() {
        let broker = InMemoryBroker::new();
        broker.set_fail_on_publish(true).await;
        let result = broker.publish("t", &Ping { seq: 1 }).await;
        assert!(matches!(result, Err(PublishError::Connection(_))));
        assert!(!broker.is_declared("t").await);
    }

    #[tokio::test]
    async fn concurrent_publishers_share_one_declaration() {
        let broker = InMemoryBroker::new();
        let mut tasks = Vec::new();
        for seq in 0..20 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                broker.publish("t", &Ping { seq }).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(broker.declaration_count().await, 1);
        assert_eq!(broker.len("t").await, 20);
    }
}
