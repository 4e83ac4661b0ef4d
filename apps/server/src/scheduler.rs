//! Periodic full sync for every user holding a stored token.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use lmsbridge_core::lms::TokenStore;

use crate::main_lib::AppState;

/// One scheduler tick: drop expired token rows, then `sync_all` per user.
/// Returns how many users synced without a run-level error.
pub async fn sync_authorized_users(state: &AppState) -> usize {
    match state.tokens.purge_expired_tokens().await {
        Ok(0) => {}
        Ok(removed) => debug!("[Scheduler] Purged {} expired token record(s)", removed),
        Err(e) => warn!("[Scheduler] Token purge failed: {}", e),
    }

    let users = match state.tokens.list_authorized_users() {
        Ok(users) => users,
        Err(e) => {
            warn!("[Scheduler] Could not list authorized users: {}", e);
            return 0;
        }
    };

    let mut synced = 0;
    for user_id in users {
        if state.orchestrator.is_cancelled() {
            break;
        }
        match state.orchestrator.sync_all(&user_id).await {
            Ok(report) => {
                synced += 1;
                info!(
                    "[Scheduler] Synced user {}: {} courses, {} enrollments, {} assignments, {} submissions ({} failed, {} scope errors)",
                    user_id,
                    report.courses,
                    report.enrollments,
                    report.assignments,
                    report.submissions,
                    report.failed,
                    report.errors.len()
                );
            }
            Err(e) => warn!("[Scheduler] Sync for user {} stopped: {}", user_id, e),
        }
    }
    synced
}

/// Run [`sync_authorized_users`] every `interval` until `shutdown` fires.
pub async fn run_periodic_sync(
    state: Arc<AppState>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("[Scheduler] Periodic sync every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full interval instead.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                sync_authorized_users(&state).await;
            }
        }
    }
    info!("[Scheduler] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_lib::test_support::test_state;
    use lmsbridge_core::lms::OAuthTokenRecord;
    use lmsbridge_events::MemoryStreamStore;

    #[tokio::test]
    async fn tick_with_no_users_syncs_nobody() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());
        assert_eq!(sync_authorized_users(&state).await, 0);
    }

    #[tokio::test]
    async fn tick_skips_users_once_cancelled() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());
        state
            .tokens
            .save_tokens(
                OAuthTokenRecord {
                    local_user_id: "u-1".to_string(),
                    access_token: "a".to_string(),
                    refresh_token: None,
                    expires_at: chrono::Utc::now().timestamp() + 3_600,
                },
                Duration::from_secs(600),
            )
            .await
            .expect("save");

        state.orchestrator.cancel();
        assert_eq!(sync_authorized_users(&state).await, 0);
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_periodic_sync(state, Duration::from_secs(3_600), rx));

        tx.send(true).expect("signal");
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("stopped in time")
            .expect("joined");
    }
}
