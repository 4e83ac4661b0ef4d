use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};

use lmsbridge_core::lms::{EntityKind, RawEntityRecord, SyncCursorRecord};

use crate::errors::StorageError;

/// One row of any `lms_*` table. Loaded with `sql_query` because the table
/// name is chosen at runtime from the descriptor table.
#[derive(QueryableByName, Debug, Clone)]
pub struct EntityRowDB {
    #[diesel(sql_type = BigInt)]
    pub local_id: i64,
    #[diesel(sql_type = Text)]
    pub remote_id: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub parent_remote_id: Option<String>,
    #[diesel(sql_type = Text)]
    pub payload: String,
    #[diesel(sql_type = Text)]
    pub updated_at: String,
}

impl EntityRowDB {
    pub fn into_record(self, kind: EntityKind) -> Result<RawEntityRecord, StorageError> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| {
            StorageError::Malformed(format!(
                "{} {} payload is not JSON: {}",
                kind, self.remote_id, e
            ))
        })?;
        Ok(RawEntityRecord {
            local_id: self.local_id,
            kind,
            remote_id: self.remote_id,
            parent_remote_id: self.parent_remote_id,
            payload,
            updated_at: self.updated_at,
        })
    }
}

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, PartialEq, Eq,
)]
#[diesel(table_name = crate::schema::sync_cursors)]
#[diesel(primary_key(scope))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncCursorDB {
    pub scope: String,
    pub cursor: Option<String>,
    pub extra: String,
    pub updated_at: String,
}

impl TryFrom<SyncCursorDB> for SyncCursorRecord {
    type Error = StorageError;

    fn try_from(row: SyncCursorDB) -> Result<Self, Self::Error> {
        let extra = match serde_json::from_str::<serde_json::Value>(&row.extra) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => serde_json::Map::new(),
            Err(e) => {
                return Err(StorageError::Malformed(format!(
                    "cursor {} extra is not JSON: {}",
                    row.scope, e
                )))
            }
        };
        Ok(SyncCursorRecord {
            scope: row.scope,
            cursor: row.cursor,
            extra,
            updated_at: row.updated_at,
        })
    }
}
