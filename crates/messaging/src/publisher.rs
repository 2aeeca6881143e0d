use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{HandlerError, Result};

/// Publishes already-encoded event bodies to a named, durable queue.
///
/// Implementations must be safe to share between request tasks and must
/// declare the target queue on first use.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hands one message to the broker. Returns once the broker accepted it.
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// JSON convenience methods for every publisher.
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// Serializes `message` as JSON and publishes it to `topic`.
    async fn publish<T: Serialize + Sync>(&self, topic: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        match self.publish_raw(topic, payload).await {
            Ok(()) => {
                metrics::counter!("events_published_total", "topic" => topic.to_string())
                    .increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("event_publish_failures_total", "topic" => topic.to_string())
                    .increment(1);
                Err(e)
            }
        }
    }

    /// Publishes and only logs a failure. Callers that have already
    /// committed their own state use this.
    async fn publish_or_warn<T: Serialize + Sync>(&self, topic: &str, message: &T) {
        if let Err(e) = self.publish(topic, message).await {
            tracing::warn!(topic, error = %e, "event publication failed");
        }
    }
}

// Blanket implementation for all EventPublisher implementations
impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

/// Consumer side of a queue. Bodies are decoded as JSON before `handle`
/// is called; a body that does not decode is dropped without redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Message: DeserializeOwned + Send;

    /// Returning an error requeues the message for another attempt.
    async fn handle(&self, message: Self::Message) -> std::result::Result<(), HandlerError>;
}
