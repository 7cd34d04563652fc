use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::types::{TransactionRecord, Watermark, WatermarkMode};

/// Result of comparing one fetched batch against the prior watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Records to announce, chronologically ascending.
    pub new: Vec<TransactionRecord>,
    /// Watermark to persist once `new` has been dispatched.
    pub watermark: Option<Watermark>,
}

/// Decides which records of a full-window fetch have not been seen before.
#[derive(Debug, Clone, Copy)]
pub struct NoveltyDetector {
    mode: WatermarkMode,
}

impl NoveltyDetector {
    /// `mode` selects the watermark derived when no prior one exists. Once a
    /// watermark exists its own variant governs detection.
    pub fn new(mode: WatermarkMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> WatermarkMode {
        self.mode
    }

    pub fn detect(&self, batch: &[TransactionRecord], prior: Option<&Watermark>) -> Detection {
        if batch.is_empty() {
            return Detection {
                new: Vec::new(),
                watermark: prior.cloned(),
            };
        }

        let Some(prior) = prior else {
            // First run: everything fetched counts as already seen.
            let watermark = derive_baseline(self.mode, batch);
            debug!(
                "Baseline {} watermark from {} record(s)",
                self.mode,
                batch.len()
            );
            return Detection {
                new: Vec::new(),
                watermark,
            };
        };

        let (mut new, watermark) = match prior {
            Watermark::ById { ids } => detect_by_id(batch, prior, ids),
            Watermark::ByTimestamp { timestamp } => detect_by_timestamp(batch, prior, *timestamp),
        };

        new.sort_by_key(|r| (r.timestamp, r.id));

        Detection {
            new,
            watermark: Some(watermark),
        }
    }
}

fn derive_baseline(mode: WatermarkMode, batch: &[TransactionRecord]) -> Option<Watermark> {
    match mode {
        WatermarkMode::ById => {
            let ids: BTreeSet<u64> = batch.iter().filter_map(|r| r.id).collect();
            if ids.is_empty() {
                warn!("No record in the batch carries an id, baseline not established");
                return None;
            }
            Some(Watermark::ById { ids })
        }
        WatermarkMode::ByTimestamp => latest_timestamp(batch)
            .map(|timestamp| Watermark::ByTimestamp { timestamp }),
    }
}

fn detect_by_id(
    batch: &[TransactionRecord],
    prior: &Watermark,
    seen: &BTreeSet<u64>,
) -> (Vec<TransactionRecord>, Watermark) {
    let mut ids = seen.clone();
    let mut new = Vec::new();

    for record in batch {
        if prior.covers(record) {
            continue;
        }
        // `insert` is false for repeats within this batch.
        if record.id.is_some_and(|id| ids.insert(id)) {
            new.push(record.clone());
        }
    }

    let untracked = batch.iter().filter(|r| r.id.is_none()).count();
    if untracked > 0 {
        warn!("Ignored {untracked} record(s) without an id in id-watermark mode");
    }

    (new, Watermark::ById { ids })
}

fn detect_by_timestamp(
    batch: &[TransactionRecord],
    prior: &Watermark,
    since: DateTime<Utc>,
) -> (Vec<TransactionRecord>, Watermark) {
    let mut emitted: HashSet<DateTime<Utc>> = HashSet::new();
    let mut new = Vec::new();

    // The feed is newest-first, so scan from the oldest end. Every record is
    // checked; ordering is not guaranteed.
    for record in batch.iter().rev() {
        if !prior.covers(record) && emitted.insert(record.timestamp) {
            new.push(record.clone());
        }
    }

    let latest = latest_timestamp(batch).map_or(since, |ts| ts.max(since));

    (new, Watermark::ByTimestamp { timestamp: latest })
}

fn latest_timestamp(batch: &[TransactionRecord]) -> Option<DateTime<Utc>> {
    batch.iter().map(|r| r.timestamp).max()
}
