//! # Redis
//!
//! Durable home of the six category tables.
//!
//! ## Requirements
//!
//! - Exact-match lookup on (address, platform) for every upsert
//! - Exact-match lookup on address for every summary query
//! - Additive accumulation that never loses a concurrent update
//! - A whole category batch lands or none of it does
//!
//! ## Implementation
//!
//! - One Redis hash per (table, address): platform -> point
//! - A sibling hash per (table, address): platform -> surrogate id
//! - One counter per table handing out surrogate ids
//! - One expiring marker per applied batch
//! - Keys: `points:{table}:rows:{address}`, `points:{table}:ids:{address}`, `points:{table}:seq`,
//!   `points:{table}:applied:{batch}`
//! - A batch runs as a single Lua script, which Redis executes without interleaving
//! - The script validates every row before its first write, since Redis does not roll back
//! - Repeated keys in one batch are summed during validation, so the cap holds for the total
//! - A batch whose marker exists is acknowledged without writing, which makes retries safe
//!
//! The connection manager multiplexes one connection, so a six-way summary
//! fan-out cannot starve itself of connections.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::{
    Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::{debug, info};

use crate::{
    error::StoreError,
    models::{BatchId, Category, MAX_POINT, PointRecord, StoredRecord},
};

/// Table-per-category storage with accumulate-by-key semantics.
#[async_trait]
pub trait PointStore: Send + Sync {
    async fn find_by_key(
        &self,
        category: Category,
        address: &str,
        platform: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// All rows for one address in one table, ordered by id.
    async fn find_by_address(
        &self,
        category: Category,
        address: &str,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Adds each record's point to its (address, platform) row, inserting the
    /// row when missing. Either every record is applied or none is, and a
    /// `batch` that was already applied is acknowledged without writing.
    async fn accumulate(
        &self,
        category: Category,
        batch: BatchId,
        records: &[PointRecord],
    ) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

// KEYS[1] = seq, KEYS[2] = applied marker, then (rows, ids) per record
// ARGV[1] = point limit, ARGV[2] = marker ttl, then (platform, delta) per record
const ACCUMULATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
local limit = tonumber(ARGV[1])
local count = (#ARGV - 2) / 2
local pending = {}
for n = 1, count do
    local rows = KEYS[1 + 2 * n]
    local platform = ARGV[1 + 2 * n]
    local totals = pending[rows]
    if not totals then
        totals = {}
        pending[rows] = totals
    end
    local value = totals[platform]
    if value == nil then
        value = 0
        local current = redis.call('HGET', rows, platform)
        if current then
            value = tonumber(current)
            if value == nil then
                return redis.error_reply('CORRUPT ' .. n)
            end
        end
    end
    value = value + tonumber(ARGV[2 + 2 * n])
    if value > limit then
        return redis.error_reply('OVERFLOW ' .. n)
    end
    totals[platform] = value
end
redis.call('SET', KEYS[2], 1, 'EX', ARGV[2])
for n = 1, count do
    local rows = KEYS[1 + 2 * n]
    local ids = KEYS[2 + 2 * n]
    local platform = ARGV[1 + 2 * n]
    local delta = ARGV[2 + 2 * n]
    if redis.call('HEXISTS', rows, platform) == 1 then
        redis.call('HINCRBY', rows, platform, delta)
    else
        local id = redis.call('INCR', KEYS[1])
        redis.call('HSET', ids, platform, id)
        redis.call('HSET', rows, platform, delta)
    end
end
return count
"#;

// Long enough to outlive every retry of a batch.
const APPLIED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn init_redis(
    redis_url: &str,
    retries: usize,
    timeout: Duration,
) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(retries)
        .set_connection_timeout(timeout);

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    info!("Redis connected");

    Ok(connection_manager)
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    accumulate_script: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            accumulate_script: Script::new(ACCUMULATE_SCRIPT),
        }
    }

    fn rows_key(category: Category, address: &str) -> String {
        format!("points:{}:rows:{address}", category.table())
    }

    fn ids_key(category: Category, address: &str) -> String {
        format!("points:{}:ids:{address}", category.table())
    }

    fn seq_key(category: Category) -> String {
        format!("points:{}:seq", category.table())
    }

    fn applied_key(category: Category, batch: BatchId) -> String {
        format!("points:{}:applied:{batch}", category.table())
    }
}

fn as_point(category: Category, field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::CorruptRow {
        table: category.table().to_string(),
        detail: format!("negative {field} {value}"),
    })
}

#[async_trait]
impl PointStore for RedisStore {
    async fn find_by_key(
        &self,
        category: Category,
        address: &str,
        platform: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let mut connection = self.connection.clone();

        let (point, id): (Option<i64>, Option<i64>) = redis::pipe()
            .hget(Self::rows_key(category, address), platform)
            .hget(Self::ids_key(category, address), platform)
            .query_async(&mut connection)
            .await?;

        match (point, id) {
            (Some(point), Some(id)) => Ok(Some(StoredRecord {
                id: as_point(category, "id", id)?,
                address: address.to_string(),
                platform: platform.to_string(),
                point: as_point(category, "point", point)?,
            })),
            (None, None) => Ok(None),
            _ => Err(StoreError::CorruptRow {
                table: category.table().to_string(),
                detail: format!("half-written row for {address}/{platform}"),
            }),
        }
    }

    async fn find_by_address(
        &self,
        category: Category,
        address: &str,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut connection = self.connection.clone();

        let (points, ids): (HashMap<String, i64>, HashMap<String, i64>) = redis::pipe()
            .hgetall(Self::rows_key(category, address))
            .hgetall(Self::ids_key(category, address))
            .query_async(&mut connection)
            .await?;

        let mut records = points
            .into_iter()
            .map(|(platform, point)| {
                let id = ids.get(&platform).copied().ok_or_else(|| StoreError::CorruptRow {
                    table: category.table().to_string(),
                    detail: format!("missing id for {address}/{platform}"),
                })?;

                Ok(StoredRecord {
                    id: as_point(category, "id", id)?,
                    address: address.to_string(),
                    point: as_point(category, "point", point)?,
                    platform,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        records.sort_by_key(|record| record.id);

        Ok(records)
    }

    async fn accumulate(
        &self,
        category: Category,
        batch: BatchId,
        records: &[PointRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut invocation = self.accumulate_script.prepare_invoke();
        invocation
            .key(Self::seq_key(category))
            .key(Self::applied_key(category, batch))
            .arg(MAX_POINT)
            .arg(APPLIED_TTL.as_secs());

        for record in records {
            invocation
                .key(Self::rows_key(category, &record.address))
                .key(Self::ids_key(category, &record.address))
                .arg(&record.platform)
                .arg(record.point);
        }

        let mut connection = self.connection.clone();
        let applied: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(|e| classify_script_error(category, records, e))?;

        if applied == 0 {
            debug!("Batch {batch} was already applied to {category}");
        } else {
            debug!("Applied {applied} records to {category}");
        }

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;

        Ok(())
    }
}

// Script rejections carry the 1-based position of the offending record.
fn classify_script_error(
    category: Category,
    records: &[PointRecord],
    error: redis::RedisError,
) -> StoreError {
    let offending = error
        .detail()
        .and_then(|detail| detail.split_whitespace().next())
        .and_then(|position| position.parse::<usize>().ok())
        .and_then(|position| records.get(position.checked_sub(1)?));

    match (error.code(), offending) {
        (Some("OVERFLOW"), Some(record)) => StoreError::Overflow {
            address: record.address.clone(),
            platform: record.platform.clone(),
        },
        (Some("CORRUPT"), Some(record)) => StoreError::CorruptRow {
            table: category.table().to_string(),
            detail: format!("non-integer point for {}/{}", record.address, record.platform),
        },
        _ => StoreError::Redis(error),
    }
}
