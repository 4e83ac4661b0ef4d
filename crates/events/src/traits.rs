use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use super::models::{ClaimedEntry, StreamEntry};
use super::Result;

/// Log-structured stream with consumer groups (Redis streams semantics).
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append an entry, trimming the stream to roughly `max_len`. Returns the new id.
    async fn append(
        &self,
        stream: &str,
        fields: &BTreeMap<String, String>,
        max_len: usize,
    ) -> Result<String>;

    /// Create `group` at the start of `stream`; an existing group is fine.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Entries never delivered to the group, waiting up to `block` for some.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Remove entries from the group's pending list.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize>;

    /// Take over pending entries idle for at least `min_idle`.
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<ClaimedEntry>>;
}

/// Side effect run for each consumed entry. An error leaves the entry pending.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, entry: &StreamEntry) -> Result<()>;
}
