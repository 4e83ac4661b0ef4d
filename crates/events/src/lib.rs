//! Push side of the LMS integration: signature-verified ingestion of live
//! events into a capped stream, and a consumer-group worker draining it.

pub mod config;
pub mod consumer;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod redis_store;
pub mod traits;

pub use config::EventStreamConfig;
pub use consumer::{ConsumerStats, EventStreamConsumer};
pub use error::{Error, Result};
pub use gateway::{sign_body, EventIngestGateway};
pub use memory::MemoryStreamStore;
pub use models::{ClaimedEntry, InboundHeaders, StreamEntry};
pub use redis_store::RedisStreamStore;
pub use traits::{EventHandler, StreamStore};
