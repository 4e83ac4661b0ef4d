//! Outbound side of the LMS integration: OAuth token lifecycle, the shared
//! rate limiter, the paginating API client and the sync orchestrator.

pub mod client;
pub mod error;
pub mod oauth;
pub mod orchestrator;
pub mod pagination;
pub mod rate_limiter;
pub mod token_service;

#[cfg(test)]
mod test_support;

pub use client::{ApiResponse, LmsApiClient, RemoteCollectionSource, RetryPolicy};
pub use error::{ConnectError, Result};
pub use oauth::{OAuthClient, TokenExchanger, TokenResponse};
pub use orchestrator::{SyncAllReport, SyncConfig, SyncOrchestrator, SyncOutcome};
pub use rate_limiter::RateLimiter;
pub use token_service::{AccessTokenProvider, TokenService};
