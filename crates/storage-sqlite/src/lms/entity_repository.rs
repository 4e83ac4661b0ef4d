//! Idempotent upserts of raw remote entities keyed by remote id.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use lmsbridge_core::errors::{DatabaseError, Error, Result};
use lmsbridge_core::lms::{
    resolve_parent_id, resolve_remote_id, EntityKind, EntityUpsertStore, RawEntityRecord,
    UpsertSummary,
};

use super::adapters::default_entity_tables;
use super::model::EntityRowDB;
use crate::db::write_actor::WriteError;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;

const ENTITY_COLUMNS: &str = "local_id, remote_id, parent_remote_id, payload, updated_at";

#[derive(QueryableByName)]
struct LocalIdRow {
    #[diesel(sql_type = BigInt)]
    local_id: i64,
}

enum ItemOutcome {
    Created,
    Updated,
}

pub struct LmsEntityRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
    tables: Arc<HashMap<EntityKind, &'static str>>,
}

impl LmsEntityRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        let tables = default_entity_tables()
            .into_iter()
            .map(|descriptor| (descriptor.kind, descriptor.table_name))
            .collect();
        Self {
            pool,
            writer,
            tables: Arc::new(tables),
        }
    }

    fn table_for(&self, kind: EntityKind) -> Result<&'static str> {
        self.tables.get(&kind).copied().ok_or_else(|| {
            Error::Database(DatabaseError::Internal(format!(
                "No table registered for entity kind '{}'",
                kind
            )))
        })
    }
}

fn upsert_one(
    conn: &mut SqliteConnection,
    table: &str,
    remote_id: &str,
    parent_remote_id: Option<&str>,
    payload: &str,
    now: &str,
) -> std::result::Result<ItemOutcome, WriteError> {
    let existing = sql_query(format!(
        "SELECT local_id FROM {} WHERE remote_id = ? LIMIT 1",
        table
    ))
    .bind::<Text, _>(remote_id)
    .get_result::<LocalIdRow>(conn)
    .optional()?;

    match existing {
        Some(row) => {
            sql_query(format!(
                "UPDATE {} SET parent_remote_id = COALESCE(?, parent_remote_id), \
                 payload = ?, updated_at = ? WHERE local_id = ?",
                table
            ))
            .bind::<Nullable<Text>, _>(parent_remote_id)
            .bind::<Text, _>(payload)
            .bind::<Text, _>(now)
            .bind::<BigInt, _>(row.local_id)
            .execute(conn)?;
            Ok(ItemOutcome::Updated)
        }
        None => {
            sql_query(format!(
                "INSERT INTO {} (remote_id, parent_remote_id, payload, updated_at) \
                 VALUES (?, ?, ?, ?)",
                table
            ))
            .bind::<Text, _>(remote_id)
            .bind::<Nullable<Text>, _>(parent_remote_id)
            .bind::<Text, _>(payload)
            .bind::<Text, _>(now)
            .execute(conn)?;
            Ok(ItemOutcome::Created)
        }
    }
}

#[async_trait]
impl EntityUpsertStore for LmsEntityRepository {
    async fn upsert_entities(
        &self,
        kind: EntityKind,
        parent_remote_id: Option<String>,
        items: Vec<Value>,
    ) -> Result<UpsertSummary> {
        let table = self.table_for(kind)?;
        if items.is_empty() {
            return Ok(UpsertSummary::default());
        }

        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let mut summary = UpsertSummary::default();

                for item in items {
                    let parent = resolve_parent_id(kind, &item, parent_remote_id.as_deref());
                    let Some(remote_id) = resolve_remote_id(kind, &item, parent.as_deref())
                    else {
                        summary.record_failure(None, format!("{} payload has no remote id", kind));
                        continue;
                    };
                    let payload = match serde_json::to_string(&item) {
                        Ok(payload) => payload,
                        Err(e) => {
                            summary.record_failure(Some(remote_id), e.to_string());
                            continue;
                        }
                    };

                    // Savepoint per item so one bad row leaves the rest of the batch intact.
                    let outcome = conn.transaction::<ItemOutcome, WriteError, _>(|item_conn| {
                        upsert_one(
                            item_conn,
                            table,
                            &remote_id,
                            parent.as_deref(),
                            &payload,
                            &now,
                        )
                    });
                    match outcome {
                        Ok(ItemOutcome::Created) => summary.created += 1,
                        Ok(ItemOutcome::Updated) => summary.updated += 1,
                        Err(e) => {
                            let message = Error::from(e).to_string();
                            log::warn!(
                                "[Storage] Failed to upsert {} {}: {}",
                                kind,
                                remote_id,
                                message
                            );
                            summary.record_failure(Some(remote_id), message);
                        }
                    }
                }

                log::debug!(
                    "[Storage] Upserted {} {} ({} created, {} updated, {} failed)",
                    summary.count(),
                    kind.plural(),
                    summary.created,
                    summary.updated,
                    summary.failed.len()
                );
                Ok(summary)
            })
            .await
    }

    fn get_entity(&self, kind: EntityKind, remote_id: &str) -> Result<Option<RawEntityRecord>> {
        let table = self.table_for(kind)?;
        let mut conn = get_connection(&self.pool)?;
        let row = sql_query(format!(
            "SELECT {} FROM {} WHERE remote_id = ? LIMIT 1",
            ENTITY_COLUMNS, table
        ))
        .bind::<Text, _>(remote_id)
        .get_result::<EntityRowDB>(&mut conn)
        .optional()
        .map_err(StorageError::from)?;

        match row {
            Some(row) => Ok(Some(row.into_record(kind)?)),
            None => Ok(None),
        }
    }

    fn list_entities(
        &self,
        kind: EntityKind,
        parent_remote_id: Option<&str>,
    ) -> Result<Vec<RawEntityRecord>> {
        let table = self.table_for(kind)?;
        let mut conn = get_connection(&self.pool)?;
        let rows = match parent_remote_id {
            Some(parent) => sql_query(format!(
                "SELECT {} FROM {} WHERE parent_remote_id = ? ORDER BY local_id",
                ENTITY_COLUMNS, table
            ))
            .bind::<Text, _>(parent)
            .load::<EntityRowDB>(&mut conn),
            None => sql_query(format!(
                "SELECT {} FROM {} ORDER BY local_id",
                ENTITY_COLUMNS, table
            ))
            .load::<EntityRowDB>(&mut conn),
        }
        .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| row.into_record(kind).map_err(Error::from))
            .collect()
    }
}
