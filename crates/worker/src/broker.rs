//! Stream-broker consumption.
//!
//! The worker reads session events through a consumer group, giving
//! at-least-once delivery with explicit per-message acknowledgement:
//! messages processed successfully are ACKed, failed ones stay pending and
//! are redelivered. [`StreamConsumer`] is the seam; production uses Redis
//! Streams ([`RedisStreamBroker`]), tests plug in an in-memory double.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use omnia_domain::error::{Error, Result};

/// One raw broker message: an id plus its key/value fields.
///
/// Session events carry their JSON under the `payload` field.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// The field session events are published under.
pub const PAYLOAD_FIELD: &str = "payload";

/// Consumer-group access to a stream broker.
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Create the consumer group (and the stream, if absent). Must be
    /// idempotent: an already-existing group is not an error.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Block-read up to `count` new messages for this consumer.
    /// An empty vec means the block time elapsed without traffic.
    async fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>>;

    /// Acknowledge one message for the group.
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<()>;

    /// Messages delivered to the group but not yet acknowledged.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis Streams implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Redis Streams consumer using a multiplexed connection manager.
///
/// Cloning is cheap; the manager reconnects automatically and is safe to
/// share across tasks.
#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: redis::aio::ConnectionManager,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::Broker(format!("invalid url: {e}")))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Broker(format!("connecting to {url}: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StreamConsumer for RedisStreamBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => {
                tracing::info!(stream, group, "consumer group created");
                Ok(())
            }
            // Another replica created it first.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::Broker(format!("creating group {group} on {stream}: {e}"))),
        }
    }

    async fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        // ">" = only messages never delivered to this group.
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(|e| Error::Broker(format!("reading {stream}: {e}")))?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::Data(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                    }
                }
                messages.push(StreamMessage {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = conn
            .xack(stream, group, &[message_id])
            .await
            .map_err(|e| Error::Broker(format!("acking {message_id} on {stream}: {e}")))?;
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingReply = conn
            .xpending(stream, group)
            .await
            .map_err(|e| Error::Broker(format!("pending summary for {stream}: {e}")))?;
        Ok(reply.count() as u64)
    }
}
