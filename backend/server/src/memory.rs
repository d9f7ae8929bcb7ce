//! In-process point tables.
//!
//! Same contract as the Redis store. Used by `STORE_BACKEND=memory` and by
//! tests. Each table sits behind its own lock, so batches for different
//! categories never contend.
use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    database::PointStore,
    error::StoreError,
    models::{BatchId, Category, MAX_POINT, PointRecord, StoredRecord},
};

// Applied batch ids remembered per table, oldest forgotten first.
const APPLIED_WINDOW: usize = 65_536;

#[derive(Debug)]
pub struct Table {
    category: Category,
    rows: Vec<StoredRecord>,
    by_key: HashMap<(String, String), usize>,
    by_address: HashMap<String, Vec<usize>>,
    next_id: u64,
    applied: HashSet<BatchId>,
    applied_order: VecDeque<BatchId>,
}

impl Table {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            rows: Vec::new(),
            by_key: HashMap::new(),
            by_address: HashMap::new(),
            next_id: 0,
            applied: HashSet::new(),
            applied_order: VecDeque::new(),
        }
    }

    pub fn find_by_key(&self, address: &str, platform: &str) -> Option<&StoredRecord> {
        self.by_key
            .get(&(address.to_string(), platform.to_string()))
            .map(|&index| &self.rows[index])
    }

    pub fn find_by_address(&self, address: &str) -> Vec<StoredRecord> {
        self.by_address
            .get(address)
            .map(|indexes| indexes.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, record: &PointRecord) -> u64 {
        self.next_id += 1;
        let index = self.rows.len();

        self.rows.push(StoredRecord {
            id: self.next_id,
            address: record.address.clone(),
            platform: record.platform.clone(),
            point: record.point,
        });
        self.by_key
            .insert((record.address.clone(), record.platform.clone()), index);
        self.by_address
            .entry(record.address.clone())
            .or_default()
            .push(index);

        self.next_id
    }

    pub fn update_increment(
        &mut self,
        address: &str,
        platform: &str,
        delta: u64,
    ) -> Result<u64, StoreError> {
        let index = *self
            .by_key
            .get(&(address.to_string(), platform.to_string()))
            .ok_or_else(|| StoreError::CorruptRow {
                table: self.category.to_string(),
                detail: format!("increment on missing row {address}/{platform}"),
            })?;

        let row = &mut self.rows[index];
        row.point = row
            .point
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow {
                address: address.to_string(),
                platform: platform.to_string(),
            })?;

        Ok(row.point)
    }

    // Sums every delta against the current rows without touching them.
    fn check_batch(&self, records: &[PointRecord]) -> Result<(), StoreError> {
        let mut pending: HashMap<(&str, &str), u64> = HashMap::new();

        for record in records {
            let key = (record.address.as_str(), record.platform.as_str());
            let current = match pending.get(&key) {
                Some(&total) => total,
                None => self
                    .find_by_key(&record.address, &record.platform)
                    .map_or(0, |row| row.point),
            };

            let total = current
                .checked_add(record.point)
                .filter(|&total| total <= MAX_POINT)
                .ok_or_else(|| StoreError::Overflow {
                    address: record.address.clone(),
                    platform: record.platform.clone(),
                })?;

            pending.insert(key, total);
        }

        Ok(())
    }

    fn remember(&mut self, batch: BatchId) {
        if self.applied_order.len() >= APPLIED_WINDOW {
            if let Some(oldest) = self.applied_order.pop_front() {
                self.applied.remove(&oldest);
            }
        }
        self.applied.insert(batch);
        self.applied_order.push_back(batch);
    }

    fn accumulate(&mut self, batch: BatchId, records: &[PointRecord]) -> Result<(), StoreError> {
        if self.applied.contains(&batch) {
            return Ok(());
        }
        self.check_batch(records)?;
        self.remember(batch);

        for record in records {
            if self.find_by_key(&record.address, &record.platform).is_some() {
                self.update_increment(&record.address, &record.platform, record.point)?;
            } else {
                self.insert(record);
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: HashMap<Category, RwLock<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Category::ALL
                .into_iter()
                .map(|category| (category, RwLock::new(Table::new(category))))
                .collect(),
        }
    }

    fn table(&self, category: Category) -> Result<&RwLock<Table>, StoreError> {
        self.tables
            .get(&category)
            .ok_or_else(|| StoreError::Unavailable(format!("table {category} not initialized")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PointStore for MemoryStore {
    async fn find_by_key(
        &self,
        category: Category,
        address: &str,
        platform: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self
            .table(category)?
            .read()
            .find_by_key(address, platform)
            .cloned())
    }

    async fn find_by_address(
        &self,
        category: Category,
        address: &str,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.table(category)?.read().find_by_address(address))
    }

    async fn accumulate(
        &self,
        category: Category,
        batch: BatchId,
        records: &[PointRecord],
    ) -> Result<(), StoreError> {
        self.table(category)?.write().accumulate(batch, records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
