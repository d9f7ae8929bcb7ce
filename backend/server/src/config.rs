use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::{error::AppError, queue::QueueSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub redis_retries: usize,
    pub redis_timeout: Duration,
    pub queue: QueueSettings,
    pub query_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            store_backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_retries: 1,
            redis_timeout: Duration::from_millis(1000),
            queue: QueueSettings::default(),
            query_timeout: Duration::from_millis(2000),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let config = Self {
            port: try_load("RUST_PORT", "8080")?,
            store_backend: try_load("STORE_BACKEND", "redis")?,
            redis_url: read_secret("REDIS_URL")
                .or_else(|| var("REDIS_URL"))
                .unwrap_or_else(|| {
                    info!("REDIS_URL not set, using default: redis://127.0.0.1:6379");
                    "redis://127.0.0.1:6379".to_string()
                }),
            redis_retries: try_load("REDIS_RETRIES", "1")?,
            redis_timeout: Duration::from_millis(try_load("REDIS_TIMEOUT_MS", "1000")?),
            queue: QueueSettings {
                workers: try_load("INGEST_WORKERS", "8")?,
                capacity: try_load("INGEST_QUEUE_CAPACITY", "1024")?,
                max_attempts: try_load("INGEST_MAX_ATTEMPTS", "3")?,
                initial_backoff: Duration::from_millis(try_load("INGEST_RETRY_BACKOFF_MS", "200")?),
                dead_letter_capacity: try_load("DEAD_LETTER_CAPACITY", "256")?,
            },
            query_timeout: Duration::from_millis(try_load("QUERY_TIMEOUT_MS", "2000")?),
        };

        if config.queue.workers < 6 {
            warn!(
                "INGEST_WORKERS={} is below the category count, batches will queue behind each other",
                config.queue.workers
            );
        }

        Ok(config)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        AppError::Config(format!("invalid {key} {raw:?}: {e}"))
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret file, falling back to environment: {e}");
        })
        .ok()
}
