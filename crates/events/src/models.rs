use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FIELD_PAYLOAD: &str = "payload";
/// Hex of a body that is not valid UTF-8, kept in place of `payload`.
pub const FIELD_PAYLOAD_HEX: &str = "payload_hex";
pub const FIELD_RECEIVED_AT: &str = "received_at";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_EVENT_TYPE: &str = "event_type";
pub const FIELD_SHARD: &str = "shard";
pub const FIELD_REASON: &str = "reason";
pub const FIELD_ORIGINAL_ID: &str = "original_id";

/// One stream record: the id the stream assigned plus flat string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn payload(&self) -> Option<&str> {
        self.field(FIELD_PAYLOAD)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.field(FIELD_EVENT_TYPE)
    }
}

/// A pending entry taken over from an idle consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    pub entry: StreamEntry,
    /// Delivery count including this claim.
    pub deliveries: u64,
}

/// Request headers of an inbound push, with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    pairs: Vec<(String, String)>,
}

impl InboundHeaders {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.as_ref().trim().to_ascii_lowercase(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.find(|header| header == name)
    }

    /// First value whose (lowercased) header name satisfies `pred`.
    pub fn find(&self, pred: impl Fn(&str) -> bool) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| pred(name))
            .map(|(_, value)| value.as_str())
    }
}
