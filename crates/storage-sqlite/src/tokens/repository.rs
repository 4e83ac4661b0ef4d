use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;

use lmsbridge_core::lms::{OAuthTokenRecord, TokenStore};
use lmsbridge_core::Result;

use super::model::OAuthTokenDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::oauth_tokens;

pub struct TokenRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl TokenRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }

    /// Delete records whose storage TTL has elapsed. Returns how many went.
    pub async fn purge_expired_tokens(&self) -> Result<usize> {
        self.writer
            .exec(|conn| {
                let now = Utc::now().timestamp();
                let removed = diesel::delete(
                    oauth_tokens::table.filter(oauth_tokens::storage_expires_at.le(now)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(removed)
            })
            .await
    }
}

#[async_trait]
impl TokenStore for TokenRepository {
    fn get_tokens(&self, user_id: &str) -> Result<Option<OAuthTokenRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().timestamp();
        let row = oauth_tokens::table
            .find(user_id)
            .filter(oauth_tokens::storage_expires_at.gt(now))
            .first::<OAuthTokenDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(OAuthTokenRecord::from))
    }

    async fn save_tokens(&self, record: OAuthTokenRecord, storage_ttl: Duration) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now();
                let ttl_secs = i64::try_from(storage_ttl.as_secs()).unwrap_or(i64::MAX);
                let row = OAuthTokenDB {
                    user_id: record.local_user_id,
                    access_token: record.access_token,
                    refresh_token: record.refresh_token,
                    expires_at: record.expires_at,
                    storage_expires_at: now.timestamp().saturating_add(ttl_secs),
                    updated_at: now.to_rfc3339(),
                };

                diesel::insert_into(oauth_tokens::table)
                    .values(&row)
                    .on_conflict(oauth_tokens::user_id)
                    .do_update()
                    .set((
                        oauth_tokens::access_token.eq(&row.access_token),
                        oauth_tokens::refresh_token.eq(&row.refresh_token),
                        oauth_tokens::expires_at.eq(row.expires_at),
                        oauth_tokens::storage_expires_at.eq(row.storage_expires_at),
                        oauth_tokens::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn delete_tokens(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(oauth_tokens::table.find(user_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn list_authorized_users(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().timestamp();
        let users = oauth_tokens::table
            .filter(oauth_tokens::storage_expires_at.gt(now))
            .select(oauth_tokens::user_id)
            .order(oauth_tokens::user_id.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(users)
    }
}
