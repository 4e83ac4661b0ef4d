//! Environment-sourced configuration for the LMS integration.

use crate::errors::{Error, Result};

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 300;
pub const DEFAULT_EVENT_STREAM: &str = "lms:events";
pub const DEFAULT_EVENT_DLQ_STREAM: &str = "lms:events:dlq";
pub const DEFAULT_STREAM_MAX_LEN: usize = 10_000;
pub const DEFAULT_SINCE_DAYS: i64 = 30;
/// Upper bound on the incremental lookback, roughly a century.
pub const MAX_SINCE_DAYS: i64 = 36_500;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_DATABASE_PATH: &str = "lmsbridge.db";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8088";
pub const DEFAULT_CONSUMER_GROUP: &str = "lmsbridge";

#[derive(Debug, Clone)]
pub struct LmsConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub rate_limit_per_minute: u32,
    /// Shared secret for inbound webhook verification. `None` means nothing
    /// can be verified and every inbound event is dead-lettered.
    pub webhook_secret: Option<String>,
    pub event_stream: String,
    pub event_dlq_stream: String,
    pub stream_max_len: usize,
    pub since_days: i64,
    /// Periodic full-sync interval; 0 disables the scheduler.
    pub sync_interval_secs: u64,
    pub redis_url: String,
    pub database_path: String,
    pub listen_addr: String,
    pub consumer_group: String,
    pub consumer_name: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    clean(lookup(name)).ok_or_else(|| Error::config(format!("{} is not set", name)))
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match clean(lookup(name)) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::config(format!("{} has an invalid value '{}'", name, raw))),
        None => Ok(default),
    }
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    clean(lookup(name)).unwrap_or_else(|| default.to_string())
}

impl LmsConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            base_url: required(&lookup, "LMS_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            client_id: required(&lookup, "LMS_CLIENT_ID")?,
            client_secret: required(&lookup, "LMS_CLIENT_SECRET")?,
            redirect_uri: required(&lookup, "LMS_REDIRECT_URI")?,
            rate_limit_per_minute: parsed(
                &lookup,
                "LMS_RATE_LIMIT_PER_MINUTE",
                DEFAULT_RATE_LIMIT_PER_MINUTE,
            )?,
            webhook_secret: clean(lookup("LMS_WEBHOOK_SECRET")),
            event_stream: or_default(&lookup, "LMS_EVENT_STREAM", DEFAULT_EVENT_STREAM),
            event_dlq_stream: or_default(&lookup, "LMS_EVENT_DLQ_STREAM", DEFAULT_EVENT_DLQ_STREAM),
            stream_max_len: parsed(&lookup, "LMS_EVENT_STREAM_MAXLEN", DEFAULT_STREAM_MAX_LEN)?,
            since_days: parsed(&lookup, "LMS_SYNC_SINCE_DAYS", DEFAULT_SINCE_DAYS)?,
            sync_interval_secs: parsed(&lookup, "LMS_SYNC_INTERVAL_SECS", 0)?,
            redis_url: or_default(&lookup, "LMS_REDIS_URL", DEFAULT_REDIS_URL),
            database_path: or_default(&lookup, "LMS_DATABASE_PATH", DEFAULT_DATABASE_PATH),
            listen_addr: or_default(&lookup, "LMS_LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            consumer_group: or_default(&lookup, "LMS_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            consumer_name: clean(lookup("LMS_CONSUMER_NAME")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::config("LMS_BASE_URL must be an http(s) URL"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(Error::config("LMS_RATE_LIMIT_PER_MINUTE must be > 0"));
        }
        if self.stream_max_len == 0 {
            return Err(Error::config("LMS_EVENT_STREAM_MAXLEN must be > 0"));
        }
        if self.since_days < 0 {
            return Err(Error::config("LMS_SYNC_SINCE_DAYS must be >= 0"));
        }
        if self.since_days > MAX_SINCE_DAYS {
            return Err(Error::config(format!(
                "LMS_SYNC_SINCE_DAYS must be <= {}",
                MAX_SINCE_DAYS
            )));
        }
        if self.event_stream == self.event_dlq_stream {
            return Err(Error::config(
                "LMS_EVENT_STREAM and LMS_EVENT_DLQ_STREAM must differ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("LMS_BASE_URL", "https://lms.example.edu/"),
            ("LMS_CLIENT_ID", "client"),
            ("LMS_CLIENT_SECRET", "secret"),
            ("LMS_REDIRECT_URI", "https://app.example.edu/lms/oauth/callback"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<LmsConfig> {
        LmsConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = load(&base_vars()).expect("config");
        assert_eq!(config.base_url, "https://lms.example.edu");
        assert_eq!(config.rate_limit_per_minute, 300);
        assert_eq!(config.event_stream, "lms:events");
        assert_eq!(config.event_dlq_stream, "lms:events:dlq");
        assert_eq!(config.since_days, 30);
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn missing_required_var_is_config_error() {
        let mut vars = base_vars();
        vars.remove("LMS_CLIENT_SECRET");
        match load(&vars) {
            Err(Error::Config(message)) => assert!(message.contains("LMS_CLIENT_SECRET")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_number_is_rejected() {
        let mut vars = base_vars();
        vars.insert("LMS_RATE_LIMIT_PER_MINUTE", "lots");
        assert!(load(&vars).is_err());

        vars.insert("LMS_RATE_LIMIT_PER_MINUTE", "0");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn lookback_is_bounded() {
        let mut vars = base_vars();
        vars.insert("LMS_SYNC_SINCE_DAYS", "36500");
        assert_eq!(load(&vars).expect("config").since_days, MAX_SINCE_DAYS);

        vars.insert("LMS_SYNC_SINCE_DAYS", "100000000");
        match load(&vars) {
            Err(Error::Config(message)) => assert!(message.contains("LMS_SYNC_SINCE_DAYS")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn blank_secret_counts_as_unset() {
        let mut vars = base_vars();
        vars.insert("LMS_WEBHOOK_SECRET", "   ");
        let config = load(&vars).expect("config");
        assert!(config.webhook_secret.is_none());
    }
}
