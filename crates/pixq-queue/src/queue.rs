//! Work queue contract and its Redis Streams implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::QueueMessage;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Deliveries allowed before a transient failure is dead-lettered
    pub max_deliveries: u32,
    /// Idle time after which an unacked delivery may be claimed by another consumer
    pub visibility_timeout: Duration,
    /// How long a receive blocks waiting for a message
    pub block_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "pixq:jobs".to_string(),
            consumer_group: "pixq:workers".to_string(),
            dlq_stream_name: "pixq:dlq".to_string(),
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
            block_ms: 1000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_deliveries),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            block_ms: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.block_ms),
        }
    }
}

/// One delivery of a message to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Transport-level ID used to resolve the delivery
    pub id: String,
    /// 1-based delivery attempt
    pub attempt: u32,
    /// Raw payload as published
    pub payload: String,
}

impl Delivery {
    /// Decode the payload into a message envelope.
    pub fn decode(&self) -> QueueResult<QueueMessage> {
        QueueMessage::from_payload(&self.payload)
    }
}

/// Durable queue with explicit acknowledgement.
///
/// Every received delivery must be resolved exactly once with `ack`,
/// `requeue` or `discard`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message; returns its transport ID.
    async fn publish(&self, message: &QueueMessage) -> QueueResult<String>;

    /// Take at most one message for `consumer`. `None` when the queue stayed empty.
    async fn receive(&self, consumer: &str) -> QueueResult<Option<Delivery>>;

    /// Processing succeeded; forget the message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Make the message available again with its attempt counter bumped.
    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Drop the message, keeping a copy on the dead-letter side.
    async fn discard(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Take over the oldest delivery left unacked past the visibility timeout.
    /// At most one per call, so the caller resolves it before claiming again.
    async fn claim_stale(&self, consumer: &str) -> QueueResult<Option<Delivery>>;

    /// Messages currently on the main stream.
    async fn depth(&self) -> QueueResult<u64>;

    /// Messages parked on the dead-letter side.
    async fn dead_letter_depth(&self) -> QueueResult<u64>;

    fn max_deliveries(&self) -> u32;
}

/// Redis Streams job queue.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist yet.
    ///
    /// The group starts at the beginning of the stream so messages published
    /// before the first worker came up are still delivered.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Dead-letter stream length.
    pub async fn dlq_depth(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    async fn append(&self, payload: &str, attempt: u32) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("message")
            .arg(payload)
            .arg("attempt")
            .arg(attempt)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;
        Ok(id)
    }
}

fn to_delivery(entry: &redis::streams::StreamId, extra_deliveries: u32) -> Delivery {
    let attempt: u32 = entry.get("attempt").unwrap_or(1);
    Delivery {
        id: entry.id.clone(),
        attempt: attempt + extra_deliveries,
        // A missing field decodes as malformed and is discarded by the consumer
        payload: entry.get("message").unwrap_or_default(),
    }
}

#[async_trait]
impl WorkQueue for JobQueue {
    async fn publish(&self, message: &QueueMessage) -> QueueResult<String> {
        let payload = message.to_payload()?;
        let id = self.append(&payload, 1).await?;

        metrics::counter!("pixq_queue_published_total").increment(1);
        info!("Published {} with message ID {}", message.label(), id);
        Ok(id)
    }

    async fn receive(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let delivery = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next())
            .map(|entry| to_delivery(&entry, 0));

        if let Some(d) = &delivery {
            debug!("Received message {} (attempt {})", d.id, d.attempt);
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&delivery.id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", delivery.id);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        // Append the retry before dropping the original so a crash in between
        // duplicates rather than loses the message.
        let new_id = self.append(&delivery.payload, delivery.attempt + 1).await?;
        self.ack(delivery).await?;

        info!(
            "Requeued message {} as {} (next attempt {})",
            delivery.id,
            new_id,
            delivery.attempt + 1
        );
        Ok(())
    }

    async fn discard(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("message")
            .arg(&delivery.payload)
            .arg("reason")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.id)
            .arg("attempt")
            .arg(delivery.attempt)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(delivery).await?;

        warn!("Moved message {} to DLQ: {}", delivery.id, reason);
        Ok(())
    }

    async fn claim_stale(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&stale.id)
            .query_async(&mut conn)
            .await?;

        // Another consumer may have claimed or resolved it in between
        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        info!(
            "Claimed stale message {} from consumer {} (delivered {} times)",
            entry.id, stale.consumer, stale.times_delivered
        );
        let times_delivered = u32::try_from(stale.times_delivered).unwrap_or(u32::MAX);
        Ok(Some(to_delivery(&entry, times_delivered)))
    }

    async fn depth(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn dead_letter_depth(&self) -> QueueResult<u64> {
        self.dlq_depth().await
    }

    fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "pixq:jobs");
        assert_eq!(config.dlq_stream_name, "pixq:dlq");
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.block_ms, 1000);
    }

    #[test]
    fn test_job_queue_rejects_bad_url() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(JobQueue::new(config).is_err());
    }

    #[test]
    fn test_delivery_decode_reports_malformed() {
        let delivery = Delivery {
            id: "1-0".to_string(),
            attempt: 1,
            payload: String::new(),
        };
        assert!(delivery.decode().unwrap_err().is_malformed());
    }
}
