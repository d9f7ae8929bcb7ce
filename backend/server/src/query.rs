//! Per-address summary across all six tables.
//!
//! One read per table runs on its own task. Results meet on a channel sized
//! to the table count, so no reader ever blocks handing its result over. A
//! failed or timed-out read leaves its slot empty; the summary is still built.
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tracing::warn;

use crate::{
    database::PointStore,
    error::StoreError,
    models::{AddressSummary, Category, StoredRecord},
};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

struct TableQueryResult {
    category: Category,
    result: Result<Vec<StoredRecord>, ReadError>,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub summary: AddressSummary,
    pub failures: Vec<String>,
}

impl QueryOutcome {
    pub fn all_failed(&self) -> bool {
        self.failures.len() == Category::ALL.len()
    }
}

pub async fn query_address(
    store: Arc<dyn PointStore>,
    address: &str,
    read_timeout: Duration,
) -> QueryOutcome {
    let (sender, mut receiver) = mpsc::channel(Category::ALL.len());

    for category in Category::ALL {
        let sender = sender.clone();
        let store = store.clone();
        let address = address.to_string();

        tokio::spawn(async move {
            let result = match timeout(read_timeout, store.find_by_address(category, &address)).await
            {
                Ok(result) => result.map_err(ReadError::from),
                Err(_) => Err(ReadError::Timeout(read_timeout)),
            };

            // The collector only goes away once every sender has been dropped.
            let _ = sender.send(TableQueryResult { category, result }).await;
        });
    }
    drop(sender);

    let mut summary = AddressSummary::empty(address);
    let mut failures = Vec::new();
    let mut reported = 0;

    while let Some(TableQueryResult { category, result }) = receiver.recv().await {
        reported += 1;
        match result {
            Ok(records) => *summary.slot_mut(category) = records,
            Err(e) => failures.push(format!("{category}: {e}")),
        }
    }

    // A panicked reader drops its sender without reporting.
    if reported < Category::ALL.len() {
        failures.push(format!(
            "{} table reads ended without a result",
            Category::ALL.len() - reported
        ));
    }

    if !failures.is_empty() {
        warn!("Address query errors for {address}: {failures:?}");
    }

    QueryOutcome { summary, failures }
}
