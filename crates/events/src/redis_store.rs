//! Redis streams implementation of [`StreamStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{AsyncCommands, RedisResult};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::models::{ClaimedEntry, StreamEntry};
use super::traits::StreamStore;
use super::{Error, Result};

#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
}

fn millis(duration: Duration) -> usize {
    usize::try_from(duration.as_millis()).unwrap_or(usize::MAX)
}

fn to_entry(stream_id: StreamId) -> StreamEntry {
    let mut fields = BTreeMap::new();
    for (name, value) in stream_id.map {
        match redis::from_redis_value::<String>(&value) {
            Ok(value) => {
                fields.insert(name, value);
            }
            Err(e) => {
                log::warn!(
                    "[Stream] Dropping non-string field {} of {}: {}",
                    name,
                    stream_id.id,
                    e
                );
            }
        }
    }
    StreamEntry {
        id: stream_id.id,
        fields,
    }
}

impl RedisStreamStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::message(format!("invalid redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn append(
        &self,
        stream: &str,
        fields: &BTreeMap<String, String>,
        max_len: usize,
    ) -> Result<String> {
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(max_len), "*", &items)
            .await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => {
                log::info!("[Stream] Created consumer group {} on {}", group, stream);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(millis(block));
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream], &[">"], &options).await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids.into_iter().map(to_entry))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let acked: usize = conn.xack(stream, group, ids).await?;
        Ok(acked)
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<ClaimedEntry>> {
        let mut conn = self.conn.clone();
        let pending: StreamPendingCountReply =
            conn.xpending_count(stream, group, "-", "+", count).await?;

        let min_idle_ms = millis(min_idle);
        let deliveries: HashMap<String, u64> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| (p.id, p.times_delivered as u64))
            .collect();
        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = deliveries.keys().map(String::as_str).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms, &ids)
            .await?;

        let mut entries: Vec<ClaimedEntry> = claimed
            .ids
            .into_iter()
            .map(|stream_id| {
                // XCLAIM counts as one more delivery.
                let previous = deliveries.get(&stream_id.id).copied().unwrap_or(0);
                ClaimedEntry {
                    entry: to_entry(stream_id),
                    deliveries: previous + 1,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.entry.id.cmp(&b.entry.id));
        Ok(entries)
    }
}
