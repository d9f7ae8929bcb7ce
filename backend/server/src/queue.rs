//! # Ingestion Queue
//!
//! Webhook requests never wait on persistence. Each category batch becomes
//! one job on a bounded channel, drained by a fixed pool of workers.
//!
//! ## Flow
//!
//! - Handler groups the batch and submits one job per category
//! - Every job gets a [`BatchId`] at submission and keeps it across retries
//! - Submission only waits when the channel is full
//! - A worker runs the upsert, retrying transport failures with exponential backoff
//! - Stores apply a batch id at most once, so a retry after a lost reply is a no-op
//! - A job that exhausts its attempts, or fails permanently, becomes a dead letter
//! - Dead letters are kept in a bounded list, oldest evicted first
//!
//! ## Shutdown
//!
//! Dropping the sender closes the channel; workers finish whatever is
//! already queued and exit.
use std::{collections::VecDeque, sync::Arc, time::Duration};

use backoff::{ExponentialBackoff, backoff::Backoff};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::sleep,
};
use tracing::{error, info, warn};

use crate::{
    database::PointStore,
    error::AppError,
    models::{BatchId, Category, PointRecord},
    upsert::upsert_once,
};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub dead_letter_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: 1024,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            dead_letter_capacity: 256,
        }
    }
}

#[derive(Debug)]
struct UpsertJob {
    batch: BatchId,
    category: Category,
    records: Vec<PointRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub batch: BatchId,
    pub category: Category,
    pub records: Vec<PointRecord>,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

struct Worker {
    store: Arc<dyn PointStore>,
    settings: QueueSettings,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
}

pub struct IngestQueue {
    sender: Mutex<Option<mpsc::Sender<UpsertJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
}

impl IngestQueue {
    pub fn start(store: Arc<dyn PointStore>, settings: QueueSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let dead_letters = Arc::new(Mutex::new(VecDeque::new()));

        let worker = Arc::new(Worker {
            store,
            settings: settings.clone(),
            dead_letters: dead_letters.clone(),
        });

        let handles = (0..settings.workers.max(1))
            .map(|id| {
                let worker = worker.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move { worker.run(id, receiver).await })
            })
            .collect();

        info!("Ingestion queue started with {} workers", settings.workers.max(1));

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            dead_letters,
        }
    }

    pub async fn submit(
        &self,
        category: Category,
        records: Vec<PointRecord>,
    ) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }

        let sender = self.sender.lock().clone().ok_or(AppError::QueueClosed)?;

        sender
            .send(UpsertJob {
                batch: BatchId::new(),
                category,
                records,
            })
            .await
            .map_err(|_| AppError::QueueClosed)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Ingestion worker ended abnormally: {e}");
            }
        }

        info!("Ingestion queue drained");
    }
}

impl Worker {
    async fn run(&self, id: usize, receiver: Arc<AsyncMutex<mpsc::Receiver<UpsertJob>>>) {
        loop {
            let job = receiver.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };

            self.process(job).await;
        }

        info!("Ingestion worker {id} stopped");
    }

    async fn process(&self, job: UpsertJob) {
        let mut backoff = ExponentialBackoff {
            current_interval: self.settings.initial_backoff,
            initial_interval: self.settings.initial_backoff,
            max_interval: self.settings.initial_backoff * 32,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 1;

        loop {
            let result =
                upsert_once(self.store.as_ref(), job.batch, job.category, &job.records).await;
            let err = match result {
                Ok(()) => return,
                Err(e) => e,
            };

            match backoff.next_backoff() {
                Some(delay) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    warn!(
                        "Upsert to {} failed on attempt {attempt}, retrying in {delay:?}: {err}",
                        job.category
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    error!(
                        "Dropping {} records for {} after {attempt} attempts: {err}",
                        job.records.len(),
                        job.category
                    );
                    self.dead_letter(job, attempt, err.to_string());
                    return;
                }
            }
        }
    }

    fn dead_letter(&self, job: UpsertJob, attempts: u32, error: String) {
        let mut dead_letters = self.dead_letters.lock();

        if self.settings.dead_letter_capacity == 0 {
            return;
        }
        while dead_letters.len() >= self.settings.dead_letter_capacity {
            dead_letters.pop_front();
        }

        dead_letters.push_back(DeadLetter {
            batch: job.batch,
            category: job.category,
            records: job.records,
            attempts,
            error,
            failed_at: Utc::now(),
        });
    }
}
