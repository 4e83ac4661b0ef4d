//! Applies consumed live events to the local entity mirror.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use lmsbridge_core::lms::{EntityKind, EntityUpsertStore};
use lmsbridge_events::{Error, EventHandler, Result, StreamEntry};

pub struct LiveEventHandler {
    entities: Arc<dyn EntityUpsertStore>,
}

/// Event name from the stream entry, falling back to the envelope metadata.
fn event_name<'a>(entry: &'a StreamEntry, envelope: &'a Value) -> Option<&'a str> {
    entry
        .event_type()
        .or_else(|| envelope.pointer("/metadata/event_name").and_then(Value::as_str))
        .or_else(|| envelope.get("event_type").and_then(Value::as_str))
}

/// Entity body: the envelope's `body` object when present, else the whole payload.
fn event_body(envelope: Value) -> Value {
    match envelope {
        Value::Object(mut map) if matches!(map.get("body"), Some(Value::Object(_))) => {
            map.remove("body").unwrap_or(Value::Null)
        }
        other => other,
    }
}

impl LiveEventHandler {
    pub fn new(entities: Arc<dyn EntityUpsertStore>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl EventHandler for LiveEventHandler {
    async fn handle(&self, entry: &StreamEntry) -> Result<()> {
        let raw = entry
            .payload()
            .ok_or_else(|| Error::handler(format!("entry {} has no payload", entry.id)))?;
        let envelope: Value = serde_json::from_str(raw)?;

        let Some(name) = event_name(entry, &envelope).map(str::to_string) else {
            debug!("[LiveEvents] Entry {} carries no event name; skipping", entry.id);
            return Ok(());
        };
        let Some(kind) = EntityKind::from_event_name(&name) else {
            debug!("[LiveEvents] Ignoring event '{}' ({})", name, entry.id);
            return Ok(());
        };

        let summary = self
            .entities
            .upsert_entities(kind, None, vec![event_body(envelope)])
            .await?;
        if let Some(failure) = summary.failed.first() {
            return Err(Error::handler(format!(
                "{} event {} not stored: {}",
                kind, entry.id, failure.message
            )));
        }

        debug!(
            "[LiveEvents] Applied {} ({} created, {} updated)",
            name, summary.created, summary.updated
        );
        Ok(())
    }
}
