//! Verifies inbound live events and routes them to the main stream or the
//! dead-letter stream.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::EventStreamConfig;
use super::models::{
    InboundHeaders, FIELD_EVENT_TYPE, FIELD_PAYLOAD, FIELD_PAYLOAD_HEX, FIELD_REASON,
    FIELD_RECEIVED_AT, FIELD_REQUEST_ID, FIELD_SHARD,
};
use super::traits::StreamStore;
use super::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Longest header value copied into a stream entry.
pub const MAX_HEADER_VALUE_BYTES: usize = 256;

const NOT_UTF8_REASON: &str = "payload is not UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verification {
    Signature,
    Token,
    Rejected(&'static str),
}

fn is_signature_header(name: &str) -> bool {
    name.starts_with("x-") && name.ends_with("-signature")
}

fn is_token_header(name: &str) -> bool {
    name.starts_with("x-") && name.ends_with("-token")
}

fn is_event_header(name: &str) -> bool {
    name.starts_with("x-") && name.ends_with("-event")
}

fn is_shard_header(name: &str) -> bool {
    name.starts_with("x-") && name.ends_with("-shard")
}

/// Cut `value` to at most `max` bytes without splitting a character.
fn truncate_on_char_boundary(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Compute a signature header value for `body`. Format: `sha256=<hex>`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::message(format!("invalid hmac key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Constant-time check of an HMAC-SHA256 signature, raw hex or `sha256=<hex>`.
fn signature_matches(secret: &str, signature: &str, body: &[u8]) -> bool {
    let signature = signature.trim();
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Constant-time equality of a presented token and the secret: both are
/// MACed under the secret and the tags compared with `verify_slice`.
fn token_matches(secret: &str, token: &str) -> bool {
    let Ok(mut expected) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    expected.update(secret.as_bytes());
    let expected = expected.finalize().into_bytes();

    let Ok(mut presented) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    presented.update(token.as_bytes());
    presented.verify_slice(&expected).is_ok()
}

fn bearer_token(headers: &InboundHeaders) -> Option<&str> {
    if let Some(auth) = headers.get("authorization") {
        let auth = auth.trim();
        let token = auth
            .get(..7)
            .filter(|scheme| scheme.eq_ignore_ascii_case("bearer "))
            .map(|_| auth[7..].trim())
            .unwrap_or(auth);
        return Some(token);
    }
    headers.find(is_token_header).map(str::trim)
}

pub struct EventIngestGateway {
    store: Arc<dyn StreamStore>,
    secret: Option<String>,
    stream: String,
    dlq_stream: String,
    max_len: usize,
}

impl EventIngestGateway {
    pub fn new(
        store: Arc<dyn StreamStore>,
        secret: Option<String>,
        config: &EventStreamConfig,
    ) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            log::warn!("[Ingest] No webhook secret configured; every live event will be dead-lettered");
        }
        Self {
            store,
            secret,
            stream: config.stream.clone(),
            dlq_stream: config.dlq_stream.clone(),
            max_len: config.max_len,
        }
    }

    fn verify(&self, body: &[u8], headers: &InboundHeaders) -> Verification {
        let Some(secret) = self.secret.as_deref() else {
            return Verification::Rejected("no webhook secret configured");
        };
        if let Some(signature) = headers.find(is_signature_header) {
            return if signature_matches(secret, signature, body) {
                Verification::Signature
            } else {
                Verification::Rejected("signature mismatch")
            };
        }
        match bearer_token(headers) {
            Some(token) if token_matches(secret, token) => Verification::Token,
            Some(_) => Verification::Rejected("token mismatch"),
            None => Verification::Rejected("missing signature or token"),
        }
    }

    fn entry_fields(raw_body: &[u8], headers: &InboundHeaders) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        match std::str::from_utf8(raw_body) {
            Ok(payload) => fields.insert(FIELD_PAYLOAD.to_string(), payload.to_string()),
            Err(_) => fields.insert(FIELD_PAYLOAD_HEX.to_string(), hex::encode(raw_body)),
        };
        fields.insert(FIELD_RECEIVED_AT.to_string(), Utc::now().to_rfc3339());

        let allowed = [
            (FIELD_REQUEST_ID, headers.get("x-request-id")),
            (FIELD_EVENT_TYPE, headers.find(is_event_header)),
            (FIELD_SHARD, headers.find(is_shard_header)),
        ];
        for (field, value) in allowed {
            if let Some(value) = value {
                fields.insert(
                    field.to_string(),
                    truncate_on_char_boundary(value, MAX_HEADER_VALUE_BYTES).to_string(),
                );
            }
        }
        fields
    }

    /// Verify and enqueue one push. Returns whether it was verified; a
    /// rejected push is dead-lettered, never refused. A body that is not
    /// UTF-8 is dead-lettered as hex, signed or not.
    pub async fn ingest(&self, raw_body: &[u8], headers: &InboundHeaders) -> Result<bool> {
        let mut fields = Self::entry_fields(raw_body, headers);
        let request_id = fields
            .get(FIELD_REQUEST_ID)
            .cloned()
            .unwrap_or_else(|| "-".to_string());

        let verification = if fields.contains_key(FIELD_PAYLOAD) {
            self.verify(raw_body, headers)
        } else {
            Verification::Rejected(NOT_UTF8_REASON)
        };

        match verification {
            Verification::Signature | Verification::Token => {
                let id = self.store.append(&self.stream, &fields, self.max_len).await?;
                log::debug!(
                    "[Ingest] Accepted event {} (request {}) as {}",
                    fields.get(FIELD_EVENT_TYPE).map(String::as_str).unwrap_or("-"),
                    request_id,
                    id
                );
                Ok(true)
            }
            Verification::Rejected(reason) => {
                fields.insert(FIELD_REASON.to_string(), reason.to_string());
                let id = self
                    .store
                    .append(&self.dlq_stream, &fields, self.max_len)
                    .await?;
                log::warn!(
                    "[Ingest] Dead-lettered event (request {}): {} as {}",
                    request_id,
                    reason,
                    id
                );
                Ok(false)
            }
        }
    }
}
