use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fixed timestamp layout shared by the CSV export and the configured start date.
///
/// Fractional seconds are optional; a trailing `Z` or RFC 3339 offset is also
/// accepted and converted to UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse a feed or config timestamp. Timestamps without an offset are UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One observed financial event, normalized from either feed variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Stable feed-assigned identifier. The CSV export has none.
    pub id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Signed amount in major currency units.
    pub amount: Decimal,
    pub currency: Option<String>,
    /// Collective or account the transaction belongs to (display only).
    pub counterparty: String,
}

/// Which watermark representation a first run derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkMode {
    ById,
    ByTimestamp,
}

impl fmt::Display for WatermarkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkMode::ById => f.write_str("by-id"),
            WatermarkMode::ByTimestamp => f.write_str("by-timestamp"),
        }
    }
}

/// Durable cursor: everything covered by it has already been notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Watermark {
    /// Every identifier observed so far. Only ever grows.
    ById { ids: BTreeSet<u64> },
    /// Latest transaction timestamp observed so far. Never regresses.
    ByTimestamp { timestamp: DateTime<Utc> },
}

impl Watermark {
    pub fn mode(&self) -> WatermarkMode {
        match self {
            Watermark::ById { .. } => WatermarkMode::ById,
            Watermark::ByTimestamp { .. } => WatermarkMode::ByTimestamp,
        }
    }

    /// The watermark a first run starts from when the fetch yields nothing to
    /// derive one from. It covers nothing after `start`.
    pub fn seed(mode: WatermarkMode, start: DateTime<Utc>) -> Self {
        match mode {
            WatermarkMode::ById => Watermark::ById {
                ids: BTreeSet::new(),
            },
            WatermarkMode::ByTimestamp => Watermark::ByTimestamp { timestamp: start },
        }
    }

    /// Whether `record` is covered by this watermark.
    ///
    /// In id mode a record without an id is treated as covered: it can never
    /// be tracked, so it must never be announced.
    pub fn covers(&self, record: &TransactionRecord) -> bool {
        match self {
            Watermark::ById { ids } => record.id.is_none_or(|id| ids.contains(&id)),
            Watermark::ByTimestamp { timestamp } => record.timestamp <= *timestamp,
        }
    }
}

/// Outcome of a single poll cycle, emitted by the reporter.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: String,
    pub fetched: usize,
    pub new: usize,
    pub notified: usize,
    pub watermark: Option<WatermarkMode>,
    pub baseline: bool,
}
