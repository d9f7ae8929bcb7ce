use tracing::{debug, error};

use crate::{
    database::PointStore,
    error::StoreError,
    models::{BatchId, Category, PointRecord},
};

/// Applies one category batch as a single unit of work.
///
/// Existing (address, platform) rows are incremented by the record's point,
/// missing rows are inserted with it. A failure leaves the table untouched
/// and is logged with the category before being handed back.
pub async fn upsert(
    store: &dyn PointStore,
    category: Category,
    records: &[PointRecord],
) -> Result<(), StoreError> {
    upsert_once(store, BatchId::new(), category, records).await
}

/// Same as [`upsert`], but keyed by `batch`: calling it again with the same
/// id after an ambiguous failure never applies the records twice.
pub async fn upsert_once(
    store: &dyn PointStore,
    batch: BatchId,
    category: Category,
    records: &[PointRecord],
) -> Result<(), StoreError> {
    if records.is_empty() {
        return Ok(());
    }

    store.accumulate(category, batch, records).await.map_err(|e| {
        error!("Failed to batch upsert data to table {category}: {e}");
        e
    })?;

    debug!("Upserted {} records into {category}", records.len());

    Ok(())
}
