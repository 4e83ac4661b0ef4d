use std::sync::Arc;

use lmsbridge_connect::{
    LmsApiClient, OAuthClient, RateLimiter, SyncConfig, SyncOrchestrator, TokenService,
};
use lmsbridge_core::lms::{EntityUpsertStore, SyncCursorStore};
use lmsbridge_core::LmsConfig;
use lmsbridge_events::{
    EventIngestGateway, EventStreamConfig, EventStreamConsumer, RedisStreamStore, StreamStore,
};
use lmsbridge_storage_sqlite::{
    create_pool, init, run_migrations, spawn_writer, DbPool, LmsEntityRepository,
    SyncCursorRepository, TokenRepository, WriteHandle,
};

use crate::live_events::LiveEventHandler;
use crate::oauth_state::OAuthStateCache;

pub struct AppState {
    pub tokens: Arc<TokenRepository>,
    pub token_service: Arc<TokenService>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub entities: Arc<dyn EntityUpsertStore>,
    pub cursors: Arc<dyn SyncCursorStore>,
    pub gateway: Arc<EventIngestGateway>,
    pub oauth_states: OAuthStateCache,
}

/// Stream settings derived from the environment configuration.
pub fn stream_config(config: &LmsConfig) -> EventStreamConfig {
    let mut stream = EventStreamConfig {
        stream: config.event_stream.clone(),
        dlq_stream: config.event_dlq_stream.clone(),
        max_len: config.stream_max_len,
        group: config.consumer_group.clone(),
        ..EventStreamConfig::default()
    };
    if let Some(name) = &config.consumer_name {
        stream.consumer = name.clone();
    }
    stream
}

impl AppState {
    /// Wire repositories, the API client and the ingest gateway together.
    pub fn assemble(
        config: LmsConfig,
        pool: Arc<DbPool>,
        writer: WriteHandle,
        stream_store: Arc<dyn StreamStore>,
    ) -> lmsbridge_core::Result<Self> {
        let tokens = Arc::new(TokenRepository::new(pool.clone(), writer.clone()));
        let entities: Arc<dyn EntityUpsertStore> =
            Arc::new(LmsEntityRepository::new(pool.clone(), writer.clone()));
        let cursors: Arc<dyn SyncCursorStore> = Arc::new(SyncCursorRepository::new(pool, writer));

        let oauth = OAuthClient::new(
            &config.base_url,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
        )?;
        let token_service = Arc::new(TokenService::new(tokens.clone(), Arc::new(oauth)));

        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        let api = LmsApiClient::new(&config.base_url, limiter, token_service.clone())?;

        let sync_config = SyncConfig {
            since_days: config.since_days,
        };
        sync_config.validate()?;
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(api),
            entities.clone(),
            cursors.clone(),
            sync_config,
        ));

        let gateway = Arc::new(EventIngestGateway::new(
            stream_store,
            config.webhook_secret.clone(),
            &stream_config(&config),
        ));

        Ok(Self {
            tokens,
            token_service,
            orchestrator,
            entities,
            cursors,
            gateway,
            oauth_states: OAuthStateCache::default(),
        })
    }
}

/// Open the database and the stream store, returning the shared state and
/// the live-event consumer that drains the stream.
pub async fn build_state(
    config: LmsConfig,
) -> anyhow::Result<(Arc<AppState>, EventStreamConsumer)> {
    let db_path = init(&config.database_path)?;
    run_migrations(&db_path)?;
    let pool = create_pool(&db_path)?;
    let writer = spawn_writer((*pool).clone());

    let stream_settings = stream_config(&config);
    stream_settings.validate()?;
    let stream_store: Arc<dyn StreamStore> =
        Arc::new(RedisStreamStore::connect(&config.redis_url).await?);

    let state = Arc::new(AppState::assemble(
        config,
        pool,
        writer,
        stream_store.clone(),
    )?);
    let handler = Arc::new(LiveEventHandler::new(state.entities.clone()));
    let consumer = EventStreamConsumer::new(stream_store, handler, stream_settings);

    Ok((state, consumer))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lmsbridge_events::MemoryStreamStore;
    use tempfile::TempDir;

    pub fn test_config(webhook_secret: Option<&str>) -> LmsConfig {
        LmsConfig::from_lookup(|name| match name {
            "LMS_BASE_URL" => Some("http://127.0.0.1:9".to_string()),
            "LMS_CLIENT_ID" => Some("client".to_string()),
            "LMS_CLIENT_SECRET" => Some("secret".to_string()),
            "LMS_REDIRECT_URI" => Some("http://localhost/lms/oauth/callback".to_string()),
            "LMS_WEBHOOK_SECRET" => webhook_secret.map(str::to_string),
            _ => None,
        })
        .expect("test config")
    }

    /// State over a fresh SQLite file and an in-memory stream store.
    pub fn test_state(
        webhook_secret: Option<&str>,
        streams: MemoryStreamStore,
    ) -> (Arc<AppState>, TempDir) {
        test_state_with_store(webhook_secret, Arc::new(streams))
    }

    pub fn test_state_with_store(
        webhook_secret: Option<&str>,
        streams: Arc<dyn StreamStore>,
    ) -> (Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("server.db");
        let db_path = db_path.to_str().expect("utf8 path").to_string();
        run_migrations(&db_path).expect("migrate");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer((*pool).clone());

        let state = AppState::assemble(
            test_config(webhook_secret),
            pool,
            writer,
            streams,
        )
        .expect("state");
        (Arc::new(state), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_config;
    use super::*;

    #[test]
    fn stream_config_follows_environment() {
        let mut config = test_config(None);
        config.event_stream = "lms:custom".to_string();
        config.consumer_name = Some("worker-a".to_string());

        let stream = stream_config(&config);
        assert_eq!(stream.stream, "lms:custom");
        assert_eq!(stream.dlq_stream, "lms:events:dlq");
        assert_eq!(stream.consumer, "worker-a");
        assert_eq!(stream.max_len, 10_000);
        assert!(stream.validate().is_ok());
    }
}
