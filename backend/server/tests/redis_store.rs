//! Runs against a live Redis. `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
use std::{
    env,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use points::{
    database::{PointStore, RedisStore, init_redis},
    error::StoreError,
    models::{BatchId, Category, MAX_POINT, PointRecord},
};

async fn store() -> Result<RedisStore> {
    let url = env::var("REDIS_URL").context("REDIS_URL must point at a disposable Redis")?;
    let connection = init_redis(&url, 1, Duration::from_secs(2)).await?;
    Ok(RedisStore::new(connection))
}

// Keys are never deleted, so every run works on fresh addresses.
fn unique_address(tag: &str) -> Result<String> {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    Ok(format!("0x{tag}{nanos:x}"))
}

#[tokio::test]
#[ignore]
async fn accumulates_and_reads_back() -> Result<()> {
    let store = store().await?;
    let address = unique_address("acc")?;

    store
        .accumulate(
            Category::Dex,
            BatchId::new(),
            &[
                PointRecord::new(&address, " binance ", 5),
                PointRecord::new(&address, "kuru", 1),
            ],
        )
        .await?;
    store
        .accumulate(
            Category::Dex,
            BatchId::new(),
            &[PointRecord::new(&address, " binance ", 3)],
        )
        .await?;

    let row = store
        .find_by_key(Category::Dex, &address, " binance ")
        .await?
        .context("row exists")?;
    assert_eq!(row.point, 8);

    let rows = store.find_by_address(Category::Dex, &address).await?;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].id < rows[1].id);
    assert!(store.find_by_address(Category::Nft, &address).await?.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn concurrent_batches_lose_nothing() -> Result<()> {
    let store = Arc::new(store().await?);
    let address = unique_address("con")?;

    let handles: Vec<_> = (1..=32u64)
        .map(|delta| {
            let store = store.clone();
            let address = address.clone();
            tokio::spawn(async move {
                store
                    .accumulate(
                        Category::Lsd,
                        BatchId::new(),
                        &[PointRecord::new(address, "magma", delta)],
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }

    let row = store
        .find_by_key(Category::Lsd, &address, "magma")
        .await?
        .context("row exists")?;
    assert_eq!(row.point, (1..=32).sum::<u64>());

    Ok(())
}

#[tokio::test]
#[ignore]
async fn overflow_rejects_whole_batch() -> Result<()> {
    let store = store().await?;
    let address = unique_address("ovf")?;

    store
        .accumulate(
            Category::Nft,
            BatchId::new(),
            &[PointRecord::new(&address, "exogame", MAX_POINT - 1)],
        )
        .await?;

    let err = store
        .accumulate(
            Category::Nft,
            BatchId::new(),
            &[
                PointRecord::new(&address, "fresh", 1),
                PointRecord::new(&address, "exogame", 10),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Overflow { ref platform, .. } if platform == "exogame"));
    assert!(store.find_by_key(Category::Nft, &address, "fresh").await?.is_none());

    Ok(())
}

#[tokio::test]
#[ignore]
async fn repeated_keys_are_summed_before_the_cap() -> Result<()> {
    let store = store().await?;
    let address = unique_address("rep")?;

    store
        .accumulate(
            Category::Gamefi,
            BatchId::new(),
            &[PointRecord::new(&address, "2048", MAX_POINT - 6)],
        )
        .await?;

    let err = store
        .accumulate(
            Category::Gamefi,
            BatchId::new(),
            &[
                PointRecord::new(&address, "2048", 4),
                PointRecord::new(&address, "2048", 4),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Overflow { .. }));
    let row = store
        .find_by_key(Category::Gamefi, &address, "2048")
        .await?
        .context("row exists")?;
    assert_eq!(row.point, MAX_POINT - 6);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn replayed_batch_is_applied_once() -> Result<()> {
    let store = store().await?;
    let address = unique_address("rpl")?;
    let batch = BatchId::new();
    let records = [PointRecord::new(&address, "kuru", 5)];

    store.accumulate(Category::Dex, batch, &records).await?;
    store.accumulate(Category::Dex, batch, &records).await?;

    let row = store
        .find_by_key(Category::Dex, &address, "kuru")
        .await?
        .context("row exists")?;
    assert_eq!(row.point, 5);

    Ok(())
}
