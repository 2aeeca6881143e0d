//! RabbitMQ publisher and consumer.
//!
//! Every topic is a durable queue bound to the default exchange, so the
//! routing key is the queue name. Publishing reuses one channel in
//! confirm mode and waits for the broker's ack.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::publisher::{EventPublisher, MessageHandler};
use crate::{PublishError, Result};

const DEFAULT_EXCHANGE: &str = "";

/// Connection pool shared by every publishing task.
pub struct AmqpPublisher {
    pool: Pool,
    declared: RwLock<HashSet<String>>,
    /// Confirm-mode channel reused across publishes; reopened after a
    /// failure or when the broker closed it.
    publishing: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    /// Builds the pool and checks that the broker answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| PublishError::Connection(format!("Failed to create pool: {e}")))?;

        pool.get()
            .await
            .map_err(|e: PoolError| PublishError::Connection(format!("Failed to connect: {e}")))?;

        tracing::info!(url, "connected to AMQP broker");

        Ok(Self {
            pool,
            declared: RwLock::new(HashSet::new()),
            publishing: Mutex::new(None),
        })
    }

    async fn channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            PublishError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| PublishError::Connection(format!("Failed to create channel: {e}")))
    }

    async fn publish_channel(&self) -> Result<Channel> {
        let mut cached = self.publishing.lock().await;
        if let Some(channel) = cached.as_ref().filter(|c| c.status().connected()) {
            return Ok(channel.clone());
        }

        let channel = self.channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PublishError::Connection(format!("Failed to enable confirms: {e}")))?;
        tracing::debug!("opened confirm-mode publishing channel");

        *cached = Some(channel.clone());
        Ok(channel)
    }

    async fn drop_publish_channel(&self) {
        self.publishing.lock().await.take();
    }

    /// Declares `queue` as durable unless this publisher already did.
    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> Result<()> {
        if self.declared.read().await.contains(queue) {
            return Ok(());
        }

        declare_queue(channel, queue).await?;
        self.declared.write().await.insert(queue.to_string());
        tracing::debug!(queue, "declared durable queue");
        Ok(())
    }

    /// Consumes `queue` until the broker closes the stream.
    ///
    /// Acks on success, nacks with requeue on handler failure and rejects
    /// bodies that do not decode.
    pub async fn consume<H>(&self, queue: &str, consumer_tag: &str, handler: Arc<H>) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        let channel = self.channel().await?;
        declare_queue(&channel, queue).await?;

        let mut consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::Connection(format!("Failed to start consumer: {e}")))?;

        tracing::info!(queue, consumer_tag, "consuming");

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(queue, error = %e, "consumer delivery error");
                    break;
                }
            };

            let settled = match serde_json::from_slice::<H::Message>(&delivery.data) {
                Err(e) => {
                    tracing::error!(queue, error = %e, "undecodable message, rejecting");
                    delivery
                        .reject(BasicRejectOptions { requeue: false })
                        .await
                }
                Ok(message) => match handler.handle(message).await {
                    Ok(()) => delivery.ack(BasicAckOptions::default()).await,
                    Err(e) => {
                        tracing::warn!(queue, error = %e, "handler failed, requeueing");
                        delivery
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            })
                            .await
                    }
                },
            };

            if let Err(e) = settled {
                tracing::error!(queue, error = %e, "failed to settle delivery");
            }
        }

        Ok(())
    }
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map(|_| ())
        .map_err(|e| PublishError::Declare {
            queue: queue.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    #[tracing::instrument(name = "amqp.publish", skip(self, payload), fields(bytes = payload.len()))]
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let channel = self.publish_channel().await?;
        let result = self.publish_confirmed(&channel, topic, &payload).await;
        if result.is_err() {
            self.drop_publish_channel().await;
        }
        result
    }
}

impl AmqpPublisher {
    async fn publish_confirmed(&self, channel: &Channel, topic: &str, payload: &[u8]) -> Result<()> {
        self.ensure_queue(channel, topic).await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_timestamp(Utc::now().timestamp().max(0) as u64);

        let rejected = |reason: String| PublishError::Rejected {
            topic: topic.to_string(),
            reason,
        };

        let confirmation = channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                topic,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| rejected(e.to_string()))?
            .await
            .map_err(|e| rejected(format!("confirmation failed: {e}")))?;

        if confirmation.is_nack() {
            return Err(rejected("broker nacked the message".to_string()));
        }
        Ok(())
    }
}
