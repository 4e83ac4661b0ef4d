//! LMS integration endpoints: OAuth authorization and sync triggers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lmsbridge_connect::{SyncAllReport, SyncOutcome};
use lmsbridge_core::lms::SyncCursorRecord;

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(alias = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub user_id: String,
    pub authorized: bool,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub count: usize,
    pub failed: usize,
    pub scope: String,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        Self {
            count: outcome.count,
            failed: outcome.failed,
            scope: outcome.scope,
        }
    }
}

fn require_user(user_id: &str) -> ApiResult<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(user_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuth
// ─────────────────────────────────────────────────────────────────────────────

async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<AuthorizeResponse>> {
    let user_id = require_user(&query.user_id)?;
    let oauth_state = state.oauth_states.issue(user_id).await;
    let url = state.token_service.authorize_url(&oauth_state)?;

    debug!("[LMS] Issued authorization URL for user {}", user_id);
    Ok(Json(AuthorizeResponse {
        url,
        state: oauth_state,
    }))
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<CallbackResponse>> {
    if let Some(error) = query.error {
        warn!("[LMS] Authorization denied by provider: {}", error);
        return Err(ApiError::BadRequest(format!(
            "Authorization was not granted: {}",
            error
        )));
    }
    let code = query
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is required".to_string()))?;
    let oauth_state = query
        .state
        .ok_or_else(|| ApiError::BadRequest("state is required".to_string()))?;

    let user_id = state
        .oauth_states
        .redeem(&oauth_state)
        .await
        .ok_or_else(|| ApiError::BadRequest("Unknown or expired OAuth state".to_string()))?;

    let record = state
        .token_service
        .complete_authorization(&user_id, &code)
        .await?;

    info!("[LMS] User {} authorized the integration", user_id);
    Ok(Json(CallbackResponse {
        user_id,
        authorized: true,
        expires_at: record.expires_at,
    }))
}

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<()>> {
    let user_id = require_user(&query.user_id)?;
    state.token_service.revoke(user_id).await?;
    Ok(Json(()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync triggers
// ─────────────────────────────────────────────────────────────────────────────

async fn sync_courses(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let user_id = require_user(&body.user_id)?;
    info!("[LMS] Syncing courses for user {}", user_id);

    let outcome = state.orchestrator.sync_courses(user_id).await?;
    Ok(Json(outcome.into()))
}

async fn sync_enrollments(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let user_id = require_user(&body.user_id)?;
    info!("[LMS] Syncing enrollments of course {}", course_id);

    let outcome = state
        .orchestrator
        .sync_course_enrollments(user_id, &course_id)
        .await?;
    Ok(Json(outcome.into()))
}

async fn sync_assignments(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<String>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let user_id = require_user(&body.user_id)?;
    info!("[LMS] Syncing assignments of course {}", course_id);

    let outcome = state
        .orchestrator
        .sync_course_assignments(user_id, &course_id)
        .await?;
    Ok(Json(outcome.into()))
}

async fn sync_submissions(
    State(state): State<Arc<AppState>>,
    Path((course_id, assignment_id)): Path<(String, String)>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncResponse>> {
    let user_id = require_user(&body.user_id)?;
    info!(
        "[LMS] Syncing submissions of assignment {} in course {}",
        assignment_id, course_id
    );

    let outcome = state
        .orchestrator
        .sync_assignment_submissions(user_id, &course_id, &assignment_id)
        .await?;
    Ok(Json(outcome.into()))
}

async fn sync_all(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncAllReport>> {
    let user_id = require_user(&body.user_id)?;
    info!("[LMS] Full sync for user {}", user_id);

    let report = state.orchestrator.sync_all(user_id).await?;
    Ok(Json(report))
}

async fn get_cursor(
    State(state): State<Arc<AppState>>,
    Path(scope): Path<String>,
) -> ApiResult<Json<SyncCursorRecord>> {
    state
        .cursors
        .get_cursor(&scope)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No cursor for scope '{}'", scope)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // OAuth
        .route("/lms/oauth/authorize", get(authorize))
        .route("/lms/oauth/callback", get(oauth_callback))
        .route("/lms/oauth/session", delete(clear_session))
        // Sync
        .route("/lms/sync/courses", post(sync_courses))
        .route(
            "/lms/sync/courses/:course_id/enrollments",
            post(sync_enrollments),
        )
        .route(
            "/lms/sync/courses/:course_id/assignments",
            post(sync_assignments),
        )
        .route(
            "/lms/sync/courses/:course_id/assignments/:assignment_id/submissions",
            post(sync_submissions),
        )
        .route("/lms/sync/all", post(sync_all))
        .route("/lms/sync/cursors/:scope", get(get_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_lib::test_support::test_state;
    use lmsbridge_core::lms::SyncCursorStore;
    use lmsbridge_events::MemoryStreamStore;

    #[tokio::test]
    async fn authorize_returns_url_carrying_issued_state() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());

        let Json(response) = authorize(
            State(state.clone()),
            Query(UserQuery {
                user_id: "u-1".to_string(),
            }),
        )
        .await
        .expect("authorize");

        assert!(response.url.contains(&format!("state={}", response.state)));
        assert_eq!(
            state.oauth_states.redeem(&response.state).await.as_deref(),
            Some("u-1")
        );
    }

    #[tokio::test]
    async fn callback_with_unknown_state_is_rejected() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());

        let err = oauth_callback(
            State(state),
            Query(CallbackQuery {
                code: Some("abc".to_string()),
                state: Some("forged".to_string()),
                error: None,
            }),
        )
        .await
        .expect_err("rejected");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn sync_without_tokens_is_unauthorized() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());

        let err = sync_courses(
            State(state),
            Json(SyncRequest {
                user_id: "nobody".to_string(),
            }),
        )
        .await
        .expect_err("not authorized");
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn blank_user_is_a_bad_request() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());

        let err = sync_all(
            State(state),
            Json(SyncRequest {
                user_id: "  ".to_string(),
            }),
        )
        .await
        .expect_err("bad request");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn cursor_lookup_returns_record_or_not_found() {
        let (state, _dir) = test_state(None, MemoryStreamStore::new());

        let missing = get_cursor(State(state.clone()), Path("user:u-1:courses".to_string()))
            .await
            .expect_err("missing");
        assert!(matches!(missing, ApiError::NotFound(_)));

        state
            .cursors
            .upsert_cursor(
                "user:u-1:courses".to_string(),
                Some("2026-01-01T00:00:00Z".to_string()),
                serde_json::Map::new(),
            )
            .await
            .expect("upsert");
        let Json(found) = get_cursor(State(state), Path("user:u-1:courses".to_string()))
            .await
            .expect("found");
        assert_eq!(found.cursor.as_deref(), Some("2026-01-01T00:00:00Z"));
    }
}
