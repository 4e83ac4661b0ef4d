//! Access-token lifecycle for local users: persist exchanged tokens and hand
//! out a valid access token, refreshing it when it is about to expire.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use lmsbridge_core::lms::{OAuthTokenRecord, TokenStore};

use crate::error::Result;
use crate::oauth::{TokenExchanger, TokenResponse};

/// A cached access token must stay valid for more than this many seconds.
pub const REFRESH_MARGIN_SECS: i64 = 60;
/// Lower bound on how long a token record is kept in storage.
pub const MIN_STORAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Assumed lifetime when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3_600;

/// Source of bearer tokens for outbound calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// `None` means the integration is not authorized for this user.
    async fn get_valid_access_token(&self, user_id: &str) -> Result<Option<String>>;
}

pub struct TokenService {
    store: Arc<dyn TokenStore>,
    exchanger: Arc<dyn TokenExchanger>,
    refresh_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            store,
            exchanger,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn authorize_url(&self, state: &str) -> Result<String> {
        self.exchanger.authorize_url(state)
    }

    /// Finish the authorization-code flow for `user_id`.
    pub async fn complete_authorization(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<OAuthTokenRecord> {
        let tokens = self.exchanger.exchange_code(code).await?;
        let record = self.save_tokens(user_id, tokens, None).await?;
        log::info!("[OAuth] Stored tokens for user {}", user_id);
        Ok(record)
    }

    /// Persist a token pair. A response without a refresh token keeps
    /// `previous_refresh_token`.
    pub async fn save_tokens(
        &self,
        user_id: &str,
        tokens: TokenResponse,
        previous_refresh_token: Option<String>,
    ) -> Result<OAuthTokenRecord> {
        let expires_in = tokens
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let record = OAuthTokenRecord {
            local_user_id: user_id.to_string(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(previous_refresh_token),
            expires_at: Utc::now().timestamp().saturating_add(expires_in),
        };
        let storage_ttl = MIN_STORAGE_TTL.max(Duration::from_secs(expires_in.unsigned_abs()));

        self.store.save_tokens(record.clone(), storage_ttl).await?;
        Ok(record)
    }

    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        self.store.delete_tokens(user_id).await?;
        log::info!("[OAuth] Removed tokens for user {}", user_id);
        Ok(())
    }

    fn cached_token(&self, user_id: &str) -> Result<(Option<String>, Option<OAuthTokenRecord>)> {
        let Some(record) = self.store.get_tokens(user_id)? else {
            return Ok((None, None));
        };
        if record.is_valid_for(Utc::now().timestamp(), REFRESH_MARGIN_SECS) {
            return Ok((Some(record.access_token.clone()), Some(record)));
        }
        Ok((None, Some(record)))
    }
}

#[async_trait]
impl AccessTokenProvider for TokenService {
    async fn get_valid_access_token(&self, user_id: &str) -> Result<Option<String>> {
        if let (Some(token), _) = self.cached_token(user_id)? {
            return Ok(Some(token));
        }

        // One refresh at a time; whoever waited re-reads what the winner stored.
        let _guard = self.refresh_lock.lock().await;
        let (cached, record) = self.cached_token(user_id)?;
        if cached.is_some() {
            return Ok(cached);
        }
        let Some(refresh_token) = record.and_then(|r| r.refresh_token) else {
            log::debug!("[OAuth] No usable token for user {}", user_id);
            return Ok(None);
        };

        log::debug!("[OAuth] Refreshing access token for user {}", user_id);
        match self.exchanger.refresh(&refresh_token).await {
            Ok(tokens) => {
                let saved = self
                    .save_tokens(user_id, tokens, Some(refresh_token))
                    .await?;
                Ok(Some(saved.access_token))
            }
            Err(e) if e.is_client_rejection() => {
                log::warn!(
                    "[OAuth] Refresh rejected for user {}; re-authorization required",
                    user_id
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
