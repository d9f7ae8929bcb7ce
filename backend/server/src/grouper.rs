//! # Grouping
//!
//! Splits a webhook batch into one record list per category table.
//!
//! Each event is a positional 4-tuple `[address, category, platform, delta]`.
//! Anything else is skipped and logged, never surfaced to the caller. The
//! category is the only normalized field; address and platform pass through
//! verbatim.
//!
//! The delta is narrowed to an integer by truncation toward zero, so `5.9`
//! becomes `5` and `-0.5` becomes `0`. Deltas above [`MAX_POINT`] are skipped.
use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::{Category, MAX_POINT, PointRecord};

const EVENT_ARITY: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("expected {EVENT_ARITY} elements, got {0}")]
    Arity(usize),

    #[error("field {0} has the wrong type")]
    FieldType(&'static str),

    #[error("point delta {0} is not a non-negative integer")]
    InvalidDelta(f64),

    #[error("unknown category {0:?}")]
    UnknownCategory(String),
}

#[derive(Debug, Default)]
pub struct Grouped {
    pub groups: BTreeMap<Category, Vec<PointRecord>>,
    pub skipped: usize,
}

impl Grouped {
    pub fn total_records(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

pub fn group(events: &[Vec<Value>]) -> Grouped {
    let mut grouped = Grouped::default();

    for (index, event) in events.iter().enumerate() {
        match parse_event(event) {
            Ok((category, record)) => grouped.groups.entry(category).or_default().push(record),
            Err(reason) => {
                warn!("Skipping invalid data at index {index}: {reason}");
                grouped.skipped += 1;
            }
        }
    }

    grouped
}

fn parse_event(event: &[Value]) -> Result<(Category, PointRecord), SkipReason> {
    let [address, category, platform, delta] = event else {
        return Err(SkipReason::Arity(event.len()));
    };

    let address = address.as_str().ok_or(SkipReason::FieldType("address"))?;
    let category = category.as_str().ok_or(SkipReason::FieldType("category"))?;
    let platform = platform.as_str().ok_or(SkipReason::FieldType("platform"))?;
    let delta = delta.as_f64().ok_or(SkipReason::FieldType("point"))?;

    let point = narrow_delta(delta)?;
    let category = category
        .parse::<Category>()
        .map_err(|e| SkipReason::UnknownCategory(e.0))?;

    Ok((category, PointRecord::new(address, platform, point)))
}

fn narrow_delta(delta: f64) -> Result<u64, SkipReason> {
    let truncated = delta.trunc();

    if !truncated.is_finite() || truncated < 0.0 || truncated > MAX_POINT as f64 {
        return Err(SkipReason::InvalidDelta(delta));
    }

    Ok(truncated as u64)
}
