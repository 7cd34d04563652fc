use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::detector::NoveltyDetector;
use crate::error::{CycleError, StoreError};
use crate::feed::{TransactionFeed, apply_floor};
use crate::notifier::{Delivery, Notify};
use crate::reporter;
use crate::store::WatermarkStore;
use crate::types::{CycleReport, TransactionRecord, Watermark};

/// What one completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Records fetched. After the start-date floor, except on a baseline cycle.
    pub fetched: usize,
    pub new: Vec<TransactionRecord>,
    /// `None` when `new` was empty and no webhook call was attempted.
    pub delivery: Option<Delivery>,
    /// Watermark to thread into the next cycle.
    pub watermark: Option<Watermark>,
    pub baseline: bool,
}

impl CycleOutcome {
    pub fn report(&self) -> CycleReport {
        let notified = match self.delivery {
            Some(Delivery::Sent { lines }) => lines,
            _ => 0,
        };
        CycleReport {
            timestamp: Utc::now().to_rfc3339(),
            fetched: self.fetched,
            new: self.new.len(),
            notified,
            watermark: self.watermark.as_ref().map(Watermark::mode),
            baseline: self.baseline,
        }
    }
}

/// Fetch → detect → notify → persist, one cycle at a time.
pub struct Poller<F, N> {
    feed: F,
    notifier: N,
    detector: NoveltyDetector,
    store: WatermarkStore,
    start_date: DateTime<Utc>,
}

impl<F: TransactionFeed, N: Notify> Poller<F, N> {
    pub fn new(
        feed: F,
        notifier: N,
        detector: NoveltyDetector,
        store: WatermarkStore,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            feed,
            notifier,
            detector,
            store,
            start_date,
        }
    }

    /// Load the persisted watermark for the configured mode.
    pub fn load_watermark(&self) -> Result<Option<Watermark>, StoreError> {
        self.store.load_for(self.detector.mode())
    }

    /// Run one cycle against `prior` and return the watermark for the next.
    ///
    /// If delivery fails the new watermark is neither returned nor persisted,
    /// so the same records are detected again after a restart.
    pub async fn run_cycle(&self, prior: Option<Watermark>) -> Result<CycleOutcome, CycleError> {
        let mut batch = self.feed.fetch().await?;
        let Some(prior) = prior else {
            return self.establish_baseline(&batch);
        };

        let floored = apply_floor(&mut batch, self.start_date);
        if floored > 0 {
            debug!("Dropped {floored} record(s) at or before the start date");
        }

        let detection = self.detector.detect(&batch, Some(&prior));

        let delivery = if detection.new.is_empty() {
            None
        } else {
            Some(self.notifier.notify(&detection.new).await?)
        };

        if let Some(watermark) = detection.watermark.as_ref().filter(|w| **w != prior) {
            self.store.save(watermark)?;
        }

        match &delivery {
            Some(Delivery::Sent { lines }) => info!(
                "Announced {lines} of {} new transaction(s)",
                detection.new.len()
            ),
            Some(Delivery::Skipped) => info!(
                "{} new transaction(s), none with a positive amount",
                detection.new.len()
            ),
            None => info!("No new transactions among {}", batch.len()),
        }

        Ok(CycleOutcome {
            fetched: batch.len(),
            new: detection.new,
            delivery,
            watermark: detection.watermark,
            baseline: false,
        })
    }

    /// First run: the whole unfloored fetch counts as seen. When it yields
    /// no watermark, the start date seeds one, so the next cycle is never a
    /// second baseline.
    fn establish_baseline(&self, batch: &[TransactionRecord]) -> Result<CycleOutcome, CycleError> {
        let watermark = match self.detector.detect(batch, None).watermark {
            Some(watermark) => watermark,
            None => {
                debug!("Nothing to derive a baseline from, seeding from the start date");
                Watermark::seed(self.detector.mode(), self.start_date)
            }
        };
        self.store.save(&watermark)?;
        info!(
            "Baseline established from {} transaction(s), nothing announced",
            batch.len()
        );

        Ok(CycleOutcome {
            fetched: batch.len(),
            new: Vec::new(),
            delivery: None,
            watermark: Some(watermark),
            baseline: true,
        })
    }

    /// Repeat cycles every `interval` until interrupted. Any cycle error ends
    /// the loop.
    pub async fn run(
        &self,
        mut watermark: Option<Watermark>,
        interval: Duration,
    ) -> Result<(), CycleError> {
        loop {
            let outcome = self.run_cycle(watermark).await?;
            reporter::report_cycle(&outcome.report());
            watermark = outcome.watermark;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
