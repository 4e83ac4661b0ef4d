//! Persistence contracts consumed by the sync and token layers.

use async_trait::async_trait;
use std::time::Duration;

use super::model::{EntityKind, OAuthTokenRecord, RawEntityRecord, SyncCursorRecord, UpsertSummary};
use crate::errors::Result;

/// One OAuth token record per local user.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns `None` when no record exists or its storage TTL has elapsed.
    fn get_tokens(&self, user_id: &str) -> Result<Option<OAuthTokenRecord>>;

    /// Insert or replace the user's record; it is dropped after `storage_ttl`.
    async fn save_tokens(&self, record: OAuthTokenRecord, storage_ttl: Duration) -> Result<()>;

    async fn delete_tokens(&self, user_id: &str) -> Result<()>;

    /// Users with a live token record.
    fn list_authorized_users(&self) -> Result<Vec<String>>;
}

/// Idempotent keyed upsert of raw remote entities.
#[async_trait]
pub trait EntityUpsertStore: Send + Sync {
    /// Upsert each item by remote id. A failing item is reported in the
    /// summary and does not abort the rest of the batch.
    async fn upsert_entities(
        &self,
        kind: EntityKind,
        parent_remote_id: Option<String>,
        items: Vec<serde_json::Value>,
    ) -> Result<UpsertSummary>;

    fn get_entity(&self, kind: EntityKind, remote_id: &str) -> Result<Option<RawEntityRecord>>;

    fn list_entities(
        &self,
        kind: EntityKind,
        parent_remote_id: Option<&str>,
    ) -> Result<Vec<RawEntityRecord>>;
}

/// Scope-keyed watermark state.
#[async_trait]
pub trait SyncCursorStore: Send + Sync {
    fn get_cursor(&self, scope: &str) -> Result<Option<SyncCursorRecord>>;

    /// Atomically create or update the cursor for `scope`.
    async fn upsert_cursor(
        &self,
        scope: String,
        cursor: Option<String>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SyncCursorRecord>;
}
