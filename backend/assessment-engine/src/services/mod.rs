use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use adaptive_selector::AdaptiveSelector;
use attempt_service::AttemptService;
use fallback_bank::FallbackBank;
use question_provider::{DisabledQuestionProvider, HttpQuestionProvider, QuestionProvider};
use response_persistence::ResponsePersistence;
use response_store::{InMemoryResponseStore, MongoResponseStore, ResponseStore};

pub struct AppState {
    pub config: Config,
    pub attempts: AttemptService,
    pub store: Arc<dyn ResponseStore>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ResponseStore> = match config.mongo_uri.as_deref() {
            Some(uri) => {
                tracing::info!("Connecting to MongoDB...");
                let client = mongodb::Client::with_uri_str(uri).await?;
                let store = MongoResponseStore::new(client.database(&config.mongo_database));

                tokio::time::timeout(Duration::from_secs(5), store.health())
                    .await
                    .map_err(|_| anyhow::anyhow!("MongoDB ping timeout after 5s"))??;

                tracing::info!(
                    "MongoDB connection established: database={}",
                    config.mongo_database
                );
                Arc::new(store)
            }
            None => {
                tracing::warn!("MONGO_URI not set, responses are kept in memory only");
                Arc::new(InMemoryResponseStore::new())
            }
        };

        let timeout = Duration::from_millis(config.question_provider_timeout_ms);
        let provider: Arc<dyn QuestionProvider> = match config.question_provider_url.as_deref() {
            Some(url) => {
                tracing::info!("Question provider configured: url={}", url);
                Arc::new(HttpQuestionProvider::new(url, timeout)?)
            }
            None => {
                tracing::warn!("No question provider configured, serving fallback bank only");
                Arc::new(DisabledQuestionProvider)
            }
        };

        Self::with_components(config, store, provider)
    }

    /// Wires the engine around an explicit store and provider.
    pub fn with_components(
        config: Config,
        store: Arc<dyn ResponseStore>,
        provider: Arc<dyn QuestionProvider>,
    ) -> anyhow::Result<Self> {
        let bank = FallbackBank::builtin()?;
        tracing::info!("Fallback bank loaded: {} questions", bank.len());

        let selector = AdaptiveSelector::new(
            provider,
            Arc::new(bank),
            Duration::from_millis(config.question_provider_timeout_ms),
            config.engine.adaptive.clone(),
        );
        let attempts = AttemptService::new(
            selector,
            ResponsePersistence::new(store.clone()),
            config.engine.clone(),
            Duration::from_secs(config.idempotency_ttl_seconds),
            config.archive_capacity,
        );

        Ok(Self {
            config,
            attempts,
            store,
        })
    }
}

pub mod adaptive_selector;
pub mod anticheat_validator;
pub mod attempt_service;
pub mod fallback_bank;
pub mod pattern_validator;
pub mod question_provider;
pub mod reporting_service;
pub mod response_persistence;
pub mod response_store;
pub mod timing_validator;
