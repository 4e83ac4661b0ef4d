//! OAuth2 authorization-code and refresh-token exchanges against the LMS.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use crate::client::truncate_for_log;
use crate::error::{ConnectError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const AUTHORIZE_PATH: &str = "/login/oauth2/auth";
const TOKEN_PATH: &str = "/login/oauth2/token";

/// Token endpoint response. `refresh_token` and `expires_in` are optional
/// on refresh grants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// The provider side of the token lifecycle.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Authorization redirect carrying the CSRF `state`.
    fn authorize_url(&self, state: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

impl OAuthClient {
    pub fn new(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        })
    }

    async fn post_token_form(&self, grant: &str, pairs: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let mut fields = vec![
            ("grant_type", grant),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        fields.extend_from_slice(pairs);

        let response = self
            .client
            .post(&url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(form_body(&fields))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!(
                "[OAuth] {} grant rejected ({}): {}",
                grant,
                status,
                truncate_for_log(&body)
            );
            return Err(ConnectError::api(
                status.as_u16(),
                format!("Token request failed: {}", truncate_for_log(&body)),
            ));
        }

        serde_json::from_str::<TokenResponse>(&body).map_err(|e| {
            log::error!("[OAuth] Failed to parse token response: {}", e);
            ConnectError::Json(e)
        })
    }
}

#[async_trait]
impl TokenExchanger for OAuthClient {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, AUTHORIZE_PATH))
            .map_err(|e| ConnectError::invalid_request(format!("Invalid LMS base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        if code.trim().is_empty() {
            return Err(ConnectError::invalid_request("Authorization code is empty"));
        }
        self.post_token_form(
            "authorization_code",
            &[("redirect_uri", self.redirect_uri.as_str()), ("code", code)],
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.post_token_form("refresh_token", &[("refresh_token", refresh_token)])
            .await
    }
}
