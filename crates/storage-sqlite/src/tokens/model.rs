//! Database model for stored OAuth tokens.

use diesel::prelude::*;

use lmsbridge_core::lms::OAuthTokenRecord;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(user_id))]
#[diesel(table_name = crate::schema::oauth_tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OAuthTokenDB {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub storage_expires_at: i64,
    pub updated_at: String,
}

impl From<OAuthTokenDB> for OAuthTokenRecord {
    fn from(row: OAuthTokenDB) -> Self {
        Self {
            local_user_id: row.user_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.expires_at,
        }
    }
}
