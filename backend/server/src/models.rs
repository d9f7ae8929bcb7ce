//! # Point Tables
//!
//! Every inbound point lands in exactly one of six category tables. A table
//! holds one accumulated row per (address, platform) pair.
//!
//! ## Rows
//! - `address`: opaque string, never validated or normalized
//! - `platform`: stored verbatim, whitespace included
//! - `point`: non-negative accumulator, only ever incremented, capped at [`MAX_POINT`]
//! - `id`: surrogate key assigned on first insert
//!
//! ## Categories
//! Inbound category strings are trimmed and lower-cased before lookup. Only
//! the six names below map to a table; anything else is rejected upstream.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Largest value a point row may hold. Redis scripts compute in doubles, so
/// every backend stops at 2^53 - 1.
pub const MAX_POINT: u64 = 9_007_199_254_740_991;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Dex,
    Nft,
    Launchpad,
    Socialfi,
    Gamefi,
    Lsd,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Dex,
        Category::Nft,
        Category::Launchpad,
        Category::Socialfi,
        Category::Gamefi,
        Category::Lsd,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Category::Dex => "dex",
            Category::Nft => "nft",
            Category::Launchpad => "launchpad",
            Category::Socialfi => "socialfi",
            Category::Gamefi => "gamefi",
            Category::Lsd => "lsd",
        }
    }

    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = Category::normalize(raw);

        Category::ALL
            .into_iter()
            .find(|category| category.table() == normalized)
            .ok_or(UnknownCategory(normalized))
    }
}

/// One validated point delta headed for a category table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRecord {
    pub address: String,
    pub platform: String,
    pub point: u64,
}

impl PointRecord {
    pub fn new(address: impl Into<String>, platform: impl Into<String>, point: u64) -> Self {
        Self {
            address: address.into(),
            platform: platform.into(),
            point,
        }
    }
}

/// Identity of one submitted batch. A store applies a given batch at most
/// once, so a retry after a lost reply cannot double count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persisted row, as read back from a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    pub address: String,
    pub platform: String,
    pub point: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSummary {
    pub address: String,
    pub dex: Vec<StoredRecord>,
    pub nft: Vec<StoredRecord>,
    pub launchpad: Vec<StoredRecord>,
    #[serde(rename = "social")]
    pub socialfi: Vec<StoredRecord>,
    #[serde(rename = "games")]
    pub gamefi: Vec<StoredRecord>,
    pub lsd: Vec<StoredRecord>,
}

impl AddressSummary {
    pub fn empty(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn slot(&self, category: Category) -> &[StoredRecord] {
        match category {
            Category::Dex => &self.dex,
            Category::Nft => &self.nft,
            Category::Launchpad => &self.launchpad,
            Category::Socialfi => &self.socialfi,
            Category::Gamefi => &self.gamefi,
            Category::Lsd => &self.lsd,
        }
    }

    pub fn slot_mut(&mut self, category: Category) -> &mut Vec<StoredRecord> {
        match category {
            Category::Dex => &mut self.dex,
            Category::Nft => &mut self.nft,
            Category::Launchpad => &mut self.launchpad,
            Category::Socialfi => &mut self.socialfi,
            Category::Gamefi => &mut self.gamefi,
            Category::Lsd => &mut self.lsd,
        }
    }
}
