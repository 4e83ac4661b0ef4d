use std::time::Duration;

use super::{Error, Result};

pub const DEFAULT_STREAM: &str = "lms:events";
pub const DEFAULT_DLQ_STREAM: &str = "lms:events:dlq";
pub const DEFAULT_MAX_LEN: usize = 10_000;
pub const DEFAULT_GROUP: &str = "lmsbridge";

#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub stream: String,
    pub dlq_stream: String,
    /// Approximate cap applied on every append.
    pub max_len: usize,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    /// How long one group read blocks waiting for new entries.
    pub block: Duration,
    /// Pause after a failed read before polling again.
    pub read_error_backoff: Duration,
    /// Pending entries idle at least this long are claimed for redelivery.
    pub reclaim_min_idle: Duration,
    /// Deliveries after which a still-failing entry is dead-lettered.
    pub max_deliveries: u64,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            dlq_stream: DEFAULT_DLQ_STREAM.to_string(),
            max_len: DEFAULT_MAX_LEN,
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::new_v4()),
            batch_size: 10,
            block: Duration::from_secs(5),
            read_error_backoff: Duration::from_secs(1),
            reclaim_min_idle: Duration::from_secs(60),
            max_deliveries: 5,
        }
    }
}

impl EventStreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream.trim().is_empty() {
            return Err(Error::InvalidConfig("stream is empty".to_string()));
        }
        if self.dlq_stream.trim().is_empty() {
            return Err(Error::InvalidConfig("dlq_stream is empty".to_string()));
        }
        if self.stream == self.dlq_stream {
            return Err(Error::InvalidConfig(
                "dlq_stream must differ from stream".to_string(),
            ));
        }
        if self.max_len == 0 {
            return Err(Error::InvalidConfig("max_len must be > 0".to_string()));
        }
        if self.group.trim().is_empty() || self.consumer.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "group and consumer must be set".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_string()));
        }
        if self.max_deliveries == 0 {
            return Err(Error::InvalidConfig("max_deliveries must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_unique_per_process() {
        let a = EventStreamConfig::default();
        let b = EventStreamConfig::default();
        a.validate().expect("valid");
        assert_eq!(a.batch_size, 10);
        assert_ne!(a.consumer, b.consumer);
    }

    #[test]
    fn rejects_dlq_equal_to_stream() {
        let cfg = EventStreamConfig {
            dlq_stream: DEFAULT_STREAM.to_string(),
            ..EventStreamConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
