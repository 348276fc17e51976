//! Wiring of stores, translator, orchestrator and queue into one application
//! context shared by the worker, the maintenance job and the admin API.

use crate::config::Config;
use crate::openai::OpenAiTranslator;
use crate::orchestrator::Orchestrator;
use crate::queue::{Queue, QueueStore};
use crate::scheduler::BatchSchedule;
use crate::store::memory::{MemoryFieldStore, MemoryLinkStore, MemoryPostStore, MemoryQueueStore};
use crate::store::postgres::PgStore;
use crate::store::{FieldStore, LinkStore, PostStore};
use crate::translator::Translator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// The collaborator adapters a context runs on.
#[derive(Clone)]
pub struct Stores {
    pub posts: Arc<dyn PostStore>,
    pub links: Arc<dyn LinkStore>,
    pub fields: Arc<dyn FieldStore>,
    pub queue: Arc<dyn QueueStore>,
}

impl Stores {
    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            posts: store.clone(),
            links: store.clone(),
            fields: store.clone(),
            queue: store,
        }
    }

    pub fn memory() -> Self {
        Self {
            posts: Arc::new(MemoryPostStore::new()),
            links: Arc::new(MemoryLinkStore::new()),
            fields: Arc::new(MemoryFieldStore::new()),
            queue: Arc::new(MemoryQueueStore::new()),
        }
    }
}

pub struct AppContext {
    pub orchestrator: Arc<Orchestrator>,
    pub queue: Arc<Queue>,
    /// Languages used when a request names none.
    pub target_languages: Vec<String>,
    pub batch_size: usize,
    pub retention_days: u32,
    pub api_key: Option<String>,
}

impl AppContext {
    pub fn new(config: &Config, stores: Stores, translator: Arc<dyn Translator>) -> Self {
        info!(
            "Translating with {} (source language {}, targets {:?})",
            translator.provider_name(),
            config.source_language,
            config.target_languages
        );
        let orchestrator = Arc::new(Orchestrator::new(
            stores.posts,
            stores.links,
            stores.fields,
            translator,
            config.orchestrator_settings(),
        ));
        let queue = Arc::new(Queue::new(
            stores.queue,
            Arc::clone(&orchestrator),
            Arc::new(BatchSchedule::new()),
        ));

        Self {
            orchestrator,
            queue,
            target_languages: config.target_languages.clone(),
            batch_size: config.queue_batch_size,
            retention_days: config.queue_retention_days,
            api_key: config.api_key.clone(),
        }
    }

    /// Production wiring: PostgreSQL adapters and the OpenAI translator.
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = PgStore::connect(&config.database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        let translator = OpenAiTranslator::new(config.openai_settings())
            .context("Failed to create OpenAI client")?;
        Ok(Self::new(config, Stores::postgres(store), Arc::new(translator)))
    }
}
