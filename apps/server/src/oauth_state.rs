//! Short-lived OAuth `state` values tying an authorization redirect to the
//! local user who started it.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

struct PendingAuthorization {
    user_id: String,
    issued_at: Instant,
}

pub struct OAuthStateCache {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl Default for OAuthStateCache {
    fn default() -> Self {
        Self::new(OAUTH_STATE_TTL)
    }
}

impl OAuthStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Remember a fresh random state for `user_id` and return it.
    pub async fn issue(&self, user_id: &str) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| now.duration_since(p.issued_at) < self.ttl);
        pending.insert(
            state.clone(),
            PendingAuthorization {
                user_id: user_id.to_string(),
                issued_at: now,
            },
        );
        state
    }

    /// Consume `state`. Unknown, reused and expired values yield `None`.
    pub async fn redeem(&self, state: &str) -> Option<String> {
        let entry = self.pending.lock().await.remove(state)?;
        (entry.issued_at.elapsed() < self.ttl).then_some(entry.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn state_redeems_once_for_its_user() {
        let cache = OAuthStateCache::default();
        let state = cache.issue("u-1").await;

        assert_eq!(cache.redeem(&state).await.as_deref(), Some("u-1"));
        assert_eq!(cache.redeem(&state).await, None);
        assert_eq!(cache.redeem("never-issued").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn state_expires_after_ttl() {
        let cache = OAuthStateCache::default();
        let fresh = cache.issue("u-1").await;
        let stale = cache.issue("u-2").await;

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        assert_eq!(cache.redeem(&fresh).await.as_deref(), Some("u-1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.redeem(&stale).await, None);
    }
}
