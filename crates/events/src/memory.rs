//! In-process [`StreamStore`] for local development and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::models::{ClaimedEntry, StreamEntry};
use super::traits::StreamStore;
use super::{Error, Result};

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u64,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered_seq: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: VecDeque<(u64, StreamEntry)>,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn entry(&self, seq: u64) -> Option<&StreamEntry> {
        self.entries
            .iter()
            .find(|(s, _)| *s == seq)
            .map(|(_, entry)| entry)
    }
}

fn parse_seq(id: &str) -> Option<u64> {
    id.split_once('-')
        .map_or(id, |(seq, _)| seq)
        .parse()
        .ok()
}

/// Streams live for the lifetime of the process. Trimming is exact.
#[derive(Clone, Default)]
pub struct MemoryStreamStore {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    appended: Arc<Notify>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entries currently retained in `stream`.
    pub async fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|state| state.entries.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of delivered but unacknowledged entries for `group`.
    pub async fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .await
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Pending entry count per owning consumer.
    pub async fn pending_by_consumer(&self, stream: &str, group: &str) -> HashMap<String, usize> {
        let streams = self.streams.lock().await;
        let mut owners = HashMap::new();
        if let Some(group_state) = streams.get(stream).and_then(|s| s.groups.get(group)) {
            for pending in group_state.pending.values() {
                *owners.entry(pending.consumer.clone()).or_insert(0) += 1;
            }
        }
        owners
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(
        &self,
        stream: &str,
        fields: &BTreeMap<String, String>,
        max_len: usize,
    ) -> Result<String> {
        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            state.next_seq += 1;
            let seq = state.next_seq;
            let id = format!("{}-0", seq);
            state.entries.push_back((
                seq,
                StreamEntry {
                    id: id.clone(),
                    fields: fields.clone(),
                },
            ));
            while state.entries.len() > max_len.max(1) {
                state.entries.pop_front();
            }
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            // Registered before checking, so an append in between still wakes us.
            let appended = self.appended.notified();
            {
                let mut streams = self.streams.lock().await;
                let state = streams
                    .get_mut(stream)
                    .ok_or_else(|| Error::message(format!("NOGROUP no such key '{stream}'")))?;
                let StreamState {
                    entries, groups, ..
                } = state;
                let group_state = groups.get_mut(group).ok_or_else(|| {
                    Error::message(format!("NOGROUP no such consumer group '{group}'"))
                })?;

                let batch: Vec<(u64, StreamEntry)> = entries
                    .iter()
                    .filter(|(seq, _)| *seq > group_state.last_delivered_seq)
                    .take(count.max(1))
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    let now = Instant::now();
                    for (seq, _) in &batch {
                        group_state.last_delivered_seq = *seq;
                        group_state.pending.insert(
                            *seq,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                deliveries: 1,
                                delivered_at: now,
                            },
                        );
                    }
                    return Ok(batch.into_iter().map(|(_, entry)| entry).collect());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize> {
        let mut streams = self.streams.lock().await;
        let Some(group_state) = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
        else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter_map(|id| parse_seq(id))
            .filter(|seq| group_state.pending.remove(seq).is_some())
            .count())
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<ClaimedEntry>> {
        let mut streams = self.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(mut group_state) = state.groups.remove(group) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        let mut trimmed = Vec::new();
        for (seq, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            let Some(entry) = state.entry(*seq) else {
                // Trimmed out of the stream; nothing left to redeliver.
                trimmed.push(*seq);
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.deliveries += 1;
            pending.delivered_at = now;
            claimed.push(ClaimedEntry {
                entry: entry.clone(),
                deliveries: pending.deliveries,
            });
        }
        for seq in trimmed {
            group_state.pending.remove(&seq);
        }
        state.groups.insert(group.to_string(), group_state);
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("payload".to_string(), value.to_string())])
    }

    #[tokio::test]
    async fn append_trims_to_max_len() {
        let store = MemoryStreamStore::new();
        for i in 0..5 {
            store
                .append("s", &fields(&i.to_string()), 3)
                .await
                .expect("append");
        }
        let entries = store.entries("s").await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].payload(), Some("2"));
    }

    #[tokio::test]
    async fn group_reads_each_entry_once_until_acked() {
        let store = MemoryStreamStore::new();
        store.ensure_group("s", "g").await.expect("group");
        store.ensure_group("s", "g").await.expect("group again");
        store.append("s", &fields("a"), 100).await.expect("append");
        store.append("s", &fields("b"), 100).await.expect("append");

        let first = store
            .read_group("s", "g", "c1", 1, Duration::ZERO)
            .await
            .expect("read");
        let second = store
            .read_group("s", "g", "c2", 10, Duration::ZERO)
            .await
            .expect("read");
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
        assert_eq!(store.pending_count("s", "g").await, 2);

        let acked = store
            .ack("s", "g", &[first[0].id.clone(), "999-0".to_string()])
            .await
            .expect("ack");
        assert_eq!(acked, 1);
        assert_eq!(store.pending_count("s", "g").await, 1);
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let store = MemoryStreamStore::new();
        store.ensure_group("s", "g").await.expect("group");

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("s", &fields("late"), 100).await.expect("append");
        });

        let read = store
            .read_group("s", "g", "c", 10, Duration::from_secs(5))
            .await
            .expect("read");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].payload(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_only_takes_idle_entries_and_counts_deliveries() {
        let store = MemoryStreamStore::new();
        store.ensure_group("s", "g").await.expect("group");
        store.append("s", &fields("x"), 100).await.expect("append");
        store
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .expect("read");

        let early = store
            .claim_stale("s", "g", "c2", Duration::from_secs(30), 10)
            .await
            .expect("claim");
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let claimed = store
            .claim_stale("s", "g", "c2", Duration::from_secs(30), 10)
            .await
            .expect("claim");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].deliveries, 2);
        let owners = store.pending_by_consumer("s", "g").await;
        assert_eq!(owners.get("c2"), Some(&1));
        assert!(!owners.contains_key("c1"));
    }

    #[tokio::test]
    async fn read_without_group_fails() {
        let store = MemoryStreamStore::new();
        store.append("s", &fields("x"), 10).await.expect("append");
        assert!(store
            .read_group("s", "missing", "c", 10, Duration::ZERO)
            .await
            .is_err());
    }
}
