//! Redis-backed durable queue.
//!
//! # Key Layout
//!
//! - `{queue}`: visible entries (LPUSH in, RPOP out)
//! - `{queue}:leases`: sorted set of lease receipts scored by expiry (ms)
//! - `{queue}:leased`: hash of receipt -> leased entry
//! - `{queue}:deliveries`: hash of message id -> dequeue count
//!
//! Leasing and lease expiry run as Lua scripts against the server clock, so
//! brokers sharing a queue agree on deadlines. Every dequeue first returns
//! expired leases to the consuming end of the queue. A lease held by a live
//! consumer is never touched before its deadline.

use crate::error::{QueueError, QueueResult};
use crate::ports::{DurableQueueStore, QueuedMessage};
use ::redis::aio::ConnectionManager;
use ::redis::Script;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Returns expired leases to the queue, then leases up to one entry per
/// receipt in ARGV[2..]. Replies with flat `receipt, entry` pairs.
const LEASE_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, receipt in ipairs(expired) do
  local entry = redis.call('HGET', KEYS[3], receipt)
  if entry then
    redis.call('RPUSH', KEYS[1], entry)
  end
  redis.call('HDEL', KEYS[3], receipt)
  redis.call('ZREM', KEYS[2], receipt)
end
local deadline = now + tonumber(ARGV[1])
local out = {}
for i = 2, #ARGV do
  local entry = redis.call('RPOP', KEYS[1])
  if not entry then
    break
  end
  redis.call('HSET', KEYS[3], ARGV[i], entry)
  redis.call('ZADD', KEYS[2], deadline, ARGV[i])
  table.insert(out, ARGV[i])
  table.insert(out, entry)
end
return out
"#;

/// Drops a lease still on record. Replies 1 when it was found.
const DELETE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[2])
return 1
"#;

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    payload: String,
}

/// Split a raw queue entry into message id and payload.
///
/// Entries pushed by other producers carry no id; theirs is derived from
/// the entry bytes so it is the same on every delivery.
fn decode_entry(raw: &str) -> StoredMessage {
    match serde_json::from_str::<StoredMessage>(raw) {
        Ok(stored) => stored,
        Err(e) => {
            debug!(error = %e, "Foreign entry in queue");
            StoredMessage {
                id: Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes()).to_string(),
                payload: raw.to_string(),
            }
        }
    }
}

/// Durable queue over Redis lists with expiring leases.
pub struct RedisQueueStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_name: String,
    leases_key: String,
    leased_key: String,
    deliveries_key: String,
    visibility_timeout: Duration,
    lease_script: Script,
    delete_script: Script,
}

impl From<::redis::RedisError> for QueueError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Store(e.to_string())
        }
    }
}

impl RedisQueueStore {
    /// Connect. Dequeued messages stay invisible for `visibility_timeout`.
    pub async fn connect(redis_url: &str, queue_name: &str, visibility_timeout: Duration) -> QueueResult<Self> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self::from_connection(redis, queue_name, visibility_timeout))
    }

    /// Build a store over an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str, visibility_timeout: Duration) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            leases_key: format!("{}:leases", queue_name),
            leased_key: format!("{}:leased", queue_name),
            deliveries_key: format!("{}:deliveries", queue_name),
            visibility_timeout,
            lease_script: Script::new(LEASE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        }
    }

    fn visibility_ms(&self) -> u64 {
        u64::try_from(self.visibility_timeout.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

#[async_trait]
impl DurableQueueStore for RedisQueueStore {
    fn name(&self) -> &str {
        &self.queue_name
    }

    async fn create_if_not_exists(&self) -> QueueResult<bool> {
        // Lists exist implicitly.
        Ok(false)
    }

    async fn enqueue(&self, payload: String) -> QueueResult<()> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            payload,
        };
        let data = serde_json::to_string(&stored).map_err(|e| QueueError::Store(e.to_string()))?;
        let mut conn = self.redis.clone();
        ::redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(data)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue_batch(&self, max_count: usize) -> QueueResult<Vec<QueuedMessage>> {
        let mut conn = self.redis.clone();
        let mut invocation = self.lease_script.prepare_invoke();
        invocation
            .key(&self.queue_name)
            .key(&self.leases_key)
            .key(&self.leased_key)
            .arg(self.visibility_ms());
        for _ in 0..max_count {
            invocation.arg(Uuid::new_v4().to_string());
        }
        let leased: Vec<String> = invocation.invoke_async(&mut conn).await?;
        if leased.is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<(String, StoredMessage)> = leased
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), decode_entry(&pair[1])))
            .collect();

        let mut pipe = ::redis::pipe();
        for (_, stored) in &entries {
            pipe.cmd("HINCRBY").arg(&self.deliveries_key).arg(&stored.id).arg(1);
        }
        let counts: Vec<i64> = pipe.query_async(&mut conn).await?;

        Ok(entries
            .into_iter()
            .zip(counts)
            .map(|((receipt, stored), count)| QueuedMessage {
                id: stored.id,
                payload: stored.payload,
                dequeue_count: u32::try_from(count).unwrap_or(u32::MAX),
                receipt,
            })
            .collect())
    }

    async fn delete(&self, message: &QueuedMessage) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .delete_script
            .key(&self.leases_key)
            .key(&self.leased_key)
            .key(&self.deliveries_key)
            .arg(&message.receipt)
            .arg(&message.id)
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(QueueError::ReceiptNotFound {
                queue: self.queue_name.clone(),
                message_id: message.id.clone(),
            });
        }
        Ok(())
    }
}
