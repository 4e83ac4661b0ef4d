mod lms;
mod webhook;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::main_lib::AppState;

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(lms::router())
        .merge(webhook::router())
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}
