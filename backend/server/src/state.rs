use std::sync::Arc;

use tracing::info;

use super::{
    classifier::Classifier,
    config::{Config, StoreBackend},
    database::{PointStore, RedisStore, init_redis},
    error::AppError,
    memory::MemoryStore,
    queue::IngestQueue,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PointStore>,
    pub queue: IngestQueue,
    pub classifier: Classifier,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let store: Arc<dyn PointStore> = match config.store_backend {
            StoreBackend::Redis => {
                let connection =
                    init_redis(&config.redis_url, config.redis_retries, config.redis_timeout)
                        .await?;
                Arc::new(RedisStore::new(connection))
            }
            StoreBackend::Memory => {
                info!("Using in-memory point tables, data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn PointStore>) -> Arc<Self> {
        let queue = IngestQueue::start(store.clone(), config.queue.clone());

        Arc::new(Self {
            config,
            store,
            queue,
            classifier: Classifier::default(),
        })
    }
}
