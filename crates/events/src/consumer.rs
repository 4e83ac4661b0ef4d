//! Consumer-group worker draining the verified event stream.
//!
//! Entries are acknowledged only after their handler succeeds. Failed
//! entries stay pending, are reclaimed once idle for `reclaim_min_idle`, and
//! after `max_deliveries` attempts are copied to the dead-letter stream and
//! then acknowledged.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

use super::config::EventStreamConfig;
use super::models::{StreamEntry, FIELD_ORIGINAL_ID, FIELD_REASON};
use super::traits::{EventHandler, StreamStore};
use super::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: usize,
    pub failed: usize,
    pub reclaimed: usize,
    pub dead_lettered: usize,
}

impl ConsumerStats {
    fn merge(&mut self, other: ConsumerStats) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.reclaimed += other.reclaimed;
        self.dead_lettered += other.dead_lettered;
    }
}

pub struct EventStreamConsumer {
    store: Arc<dyn StreamStore>,
    handler: Arc<dyn EventHandler>,
    config: EventStreamConfig,
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

impl EventStreamConsumer {
    pub fn new(
        store: Arc<dyn StreamStore>,
        handler: Arc<dyn EventHandler>,
        config: EventStreamConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &EventStreamConfig {
        &self.config
    }

    pub async fn ensure_group(&self) -> Result<()> {
        self.store
            .ensure_group(&self.config.stream, &self.config.group)
            .await
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped). A
    /// batch already being processed is finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats> {
        let mut totals = ConsumerStats::default();

        // Init: keep trying to create the group until it exists.
        loop {
            if shutdown_requested(&shutdown) {
                return Ok(totals);
            }
            match self.ensure_group().await {
                Ok(()) => break,
                Err(e) => {
                    log::warn!("[Consumer] Could not ensure consumer group: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => return Ok(totals),
                        _ = sleep(self.config.read_error_backoff) => {}
                    }
                }
            }
        }
        log::info!(
            "[Consumer] {} polling {} as group {}",
            self.config.consumer,
            self.config.stream,
            self.config.group
        );

        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            match self.reclaim_stale().await {
                Ok(stats) => totals.merge(stats),
                Err(e) => log::warn!("[Consumer] Reclaiming pending entries failed: {}", e),
            }

            let read = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                read = self.read_batch() => read,
            };

            match read {
                Ok(entries) => totals.merge(self.process_batch(entries).await),
                Err(e) => {
                    log::warn!("[Consumer] Stream read failed: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(self.config.read_error_backoff) => {}
                    }
                }
            }
        }

        log::info!(
            "[Consumer] {} stopped: {} processed, {} failed, {} dead-lettered",
            self.config.consumer,
            totals.processed,
            totals.failed,
            totals.dead_lettered
        );
        Ok(totals)
    }

    /// One polling cycle: reclaim idle pending entries, then read and
    /// process one batch of new ones.
    pub async fn run_once(&self) -> Result<ConsumerStats> {
        let mut stats = self.reclaim_stale().await?;
        let entries = self.read_batch().await?;
        stats.merge(self.process_batch(entries).await);
        Ok(stats)
    }

    async fn read_batch(&self) -> Result<Vec<StreamEntry>> {
        self.store
            .read_group(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.batch_size,
                self.config.block,
            )
            .await
    }

    async fn process_batch(&self, entries: Vec<StreamEntry>) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        for entry in entries {
            if self.process_entry(&entry).await {
                stats.processed += 1;
            } else {
                stats.failed += 1;
            }
        }
        stats
    }

    /// Run the handler and ack on success. Returns whether it succeeded.
    async fn process_entry(&self, entry: &StreamEntry) -> bool {
        if let Err(e) = self.handler.handle(entry).await {
            log::warn!(
                "[Consumer] Handler failed for {}; leaving it pending: {}",
                entry.id,
                e
            );
            return false;
        }
        if let Err(e) = self.ack(&entry.id).await {
            // Processed but still pending: it will be redelivered, which the
            // idempotent handlers tolerate.
            log::warn!("[Consumer] Failed to ack {}: {}", entry.id, e);
        }
        true
    }

    async fn ack(&self, id: &str) -> Result<usize> {
        self.store
            .ack(&self.config.stream, &self.config.group, &[id.to_string()])
            .await
    }

    async fn reclaim_stale(&self) -> Result<ConsumerStats> {
        let claimed = self
            .store
            .claim_stale(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.reclaim_min_idle,
                self.config.batch_size,
            )
            .await?;

        let mut stats = ConsumerStats::default();
        for claim in claimed {
            stats.reclaimed += 1;
            if claim.deliveries > self.config.max_deliveries {
                self.dead_letter(&claim.entry, claim.deliveries - 1).await?;
                stats.dead_lettered += 1;
                continue;
            }
            log::debug!(
                "[Consumer] Redelivering {} (delivery {})",
                claim.entry.id,
                claim.deliveries
            );
            if self.process_entry(&claim.entry).await {
                stats.processed += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    async fn dead_letter(&self, entry: &StreamEntry, attempts: u64) -> Result<()> {
        let mut fields: BTreeMap<String, String> = entry.fields.clone();
        fields.insert(
            FIELD_REASON.to_string(),
            format!("handler failed after {} deliveries", attempts),
        );
        fields.insert(FIELD_ORIGINAL_ID.to_string(), entry.id.clone());

        let dlq_id = self
            .store
            .append(&self.config.dlq_stream, &fields, self.config.max_len)
            .await?;
        self.ack(&entry.id).await?;
        log::error!(
            "[Consumer] Dead-lettered {} as {} after {} deliveries",
            entry.id,
            dlq_id,
            attempts
        );
        Ok(())
    }
}
