//! Event publication for the storefront services.
//!
//! Events are JSON bodies published to durable named queues, one queue
//! per topic. Publication is at-least-once and fire-and-forget: callers
//! wait only for the broker to accept the message.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod error;
pub mod memory;
pub mod publisher;

pub use error::{HandlerError, PublishError, Result};
pub use memory::{Delivery, InMemoryBroker, QueuedMessage};
pub use publisher::{EventPublisher, EventPublisherExt, MessageHandler};

#[cfg(feature = "amqp")]
pub use amqp::AmqpPublisher;

use std::sync::Arc;

/// Picks the publisher for a service process.
///
/// With a broker URL (and the `amqp` feature) events go to RabbitMQ;
/// otherwise they stay in an in-process broker.
pub async fn connect_publisher(amqp_url: Option<&str>) -> Result<Arc<dyn EventPublisher>> {
    #[cfg(feature = "amqp")]
    if let Some(url) = amqp_url {
        let publisher = AmqpPublisher::connect(url).await?;
        return Ok(Arc::new(publisher));
    }

    if amqp_url.is_some() {
        tracing::warn!("AMQP_URL set but the amqp feature is disabled, using in-process broker");
    } else {
        tracing::warn!("AMQP_URL not set, events stay in the in-process broker");
    }
    Ok(Arc::new(InMemoryBroker::new()))
}
