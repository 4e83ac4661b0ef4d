use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use serde_json::{Map, Value};
use std::sync::Arc;

use lmsbridge_core::lms::{SyncCursorRecord, SyncCursorStore};
use lmsbridge_core::Result;

use super::model::SyncCursorDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::sync_cursors;

pub struct SyncCursorRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SyncCursorRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SyncCursorStore for SyncCursorRepository {
    fn get_cursor(&self, scope: &str) -> Result<Option<SyncCursorRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_cursors::table
            .find(scope)
            .first::<SyncCursorDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        match row {
            Some(row) => Ok(Some(SyncCursorRecord::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_cursor(
        &self,
        scope: String,
        cursor: Option<String>,
        extra: Map<String, Value>,
    ) -> Result<SyncCursorRecord> {
        let row = SyncCursorDB {
            scope,
            cursor,
            extra: serde_json::to_string(&Value::Object(extra))?,
            updated_at: Utc::now().to_rfc3339(),
        };

        let saved = self
            .writer
            .exec(move |conn| {
                diesel::insert_into(sync_cursors::table)
                    .values(&row)
                    .on_conflict(sync_cursors::scope)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(row)
            })
            .await?;

        Ok(SyncCursorRecord::try_from(saved)?)
    }
}
