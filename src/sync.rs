//! Drives one dataset sync end to end: cursor resume, page fetch loop,
//! normalization, per-page commit, terminal state.

use crate::config::SyncConfig;
use crate::cursor::{Cursor, CursorStrategy};
use crate::datasets::{DatasetId, DateRange, LatLon};
use crate::error::ChidataError;
use crate::fetch::Fetcher;
use crate::normalize::normalize;
use crate::store::{CacheStore, MergeResult, RunStatus, SyncState};
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a sync run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The cache already covered the requested range; nothing was fetched.
    UpToDate,
    /// The run walked the range to exhaustion and committed every page.
    Complete,
    /// Cancellation was requested; pages committed so far are durable.
    Cancelled,
    /// A page failed permanently; the watermark marks the last good page.
    Failed,
}

/// Summary of one sync run.
#[derive(Debug)]
pub struct SyncResult {
    pub dataset: DatasetId,
    pub pages_fetched: u32,
    pub records_committed: u64,
    pub merge: MergeResult,
    pub status: SyncStatus,
    pub error: Option<ChidataError>,
}

impl SyncResult {
    fn new(dataset: DatasetId) -> Self {
        Self {
            dataset,
            pages_fetched: 0,
            records_committed: 0,
            merge: MergeResult::default(),
            status: SyncStatus::Complete,
            error: None,
        }
    }
}

/// Runs incremental syncs for one upstream source.
///
/// Single-flight per dataset is enforced by the store's per-dataset write
/// lock; two concurrent runs for the same dataset interleave page commits
/// rather than corrupting the cache, and the monotonic-watermark check
/// rejects the stale one.
pub struct SyncOrchestrator {
    store: Arc<CacheStore>,
    fetcher: Arc<Fetcher>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<Fetcher>, config: SyncConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    /// Syncs `dataset` over `range`, resuming from the persisted watermark
    /// when one exists for this range.
    ///
    /// Failures of individual pages end the run with [`SyncStatus::Failed`]
    /// and the error attached to the result; everything committed before the
    /// failure stays committed and a later run resumes past it.
    pub async fn sync(
        &self,
        dataset: DatasetId,
        range: DateRange,
        location: LatLon,
        cancel: Option<&CancellationToken>,
    ) -> Result<SyncResult, ChidataError> {
        let mut result = SyncResult::new(dataset);
        let state = self.store.sync_state(dataset).await.map_err(ChidataError::from)?;

        if covers(dataset, state.as_ref(), range) {
            info!("{dataset}: cache already covers {} to {}", range.start, range.end);
            result.status = SyncStatus::UpToDate;
            return Ok(result);
        }

        // An offset watermark only addresses the result set of the range it
        // was accumulated for; a different range starts over.
        let mut cursor: Option<Cursor> = state
            .as_ref()
            .filter(|s| s.range == Some(range))
            .and_then(|s| s.watermark);
        let strategy = dataset.strategy();

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                info!("{dataset}: sync cancelled after {} pages", result.pages_fetched);
                self.store.mark_finished(dataset, RunStatus::Partial).await?;
                result.status = SyncStatus::Cancelled;
                return Ok(result);
            }
            if range_covered(cursor.as_ref(), range) {
                break;
            }

            let params = strategy.next(cursor.as_ref(), self.config.page_size);
            let request = dataset.build_request(&self.config, &params, range, location);
            let page = match self.fetcher.fetch(&request).await {
                Ok(page) => page,
                Err(e) => return self.fail(dataset, result, e.into()).await,
            };
            result.pages_fetched += 1;

            let records = match normalize(&page.payload, dataset.schema(), page.fetched_at) {
                Ok(records) => records,
                Err(e) => return self.fail(dataset, result, e.into()).await,
            };

            let exhausted = strategy.exhausted(records.len(), self.config.page_size);
            let next_cursor = strategy.advance(cursor.as_ref(), &records);
            // An inclusive watermark re-fetches its boundary; when a page
            // yields no forward motion the range is drained.
            let progressed = next_cursor != cursor;

            if !records.is_empty() {
                if let Some(next) = next_cursor {
                    let merged = match self
                        .store
                        .commit_page(dataset, &records, next, range)
                        .await
                    {
                        Ok(merged) => merged,
                        Err(e) => return self.fail(dataset, result, e.into()).await,
                    };
                    result.records_committed += records.len() as u64;
                    result.merge.absorb(merged);
                }
            }
            cursor = next_cursor;

            if exhausted || !progressed {
                break;
            }
        }

        self.store.mark_finished(dataset, RunStatus::Success).await?;
        info!(
            "{dataset}: sync complete, {} pages, {} records ({} new)",
            result.pages_fetched, result.records_committed, result.merge.inserted
        );
        result.status = SyncStatus::Complete;
        Ok(result)
    }

    /// Records a failed run and folds the error into the result instead of
    /// propagating it, so callers still see the partial progress counters.
    async fn fail(
        &self,
        dataset: DatasetId,
        mut result: SyncResult,
        error: ChidataError,
    ) -> Result<SyncResult, ChidataError> {
        warn!(
            "{dataset}: sync failed after {} pages: {error}",
            result.pages_fetched
        );
        if let Err(e) = self.store.mark_finished(dataset, RunStatus::Failed).await {
            warn!("{dataset}: could not record failed run: {e}");
        }
        result.status = SyncStatus::Failed;
        result.error = Some(error);
        Ok(result)
    }
}

/// Whether the persisted state already covers `range`, making a fetch
/// unnecessary.
fn covers(dataset: DatasetId, state: Option<&SyncState>, range: DateRange) -> bool {
    let Some(state) = state else {
        return false;
    };
    if state.last_run_status != RunStatus::Success {
        return false;
    }
    match (dataset.strategy(), state.watermark, state.range) {
        (CursorStrategy::Watermark, Some(Cursor::Watermark(ts)), Some(prev)) => {
            prev.start <= range.start && ts.date_naive() >= range.end
        }
        // Offset counts are only comparable for the identical range.
        (CursorStrategy::Offset, Some(Cursor::Offset(_)), Some(prev)) => prev == range,
        _ => false,
    }
}

/// Whether the watermark already sits at or past the end of the requested
/// range. Offset cursors carry no notion of coverage; their loop terminates
/// on a short page instead.
fn range_covered(cursor: Option<&Cursor>, range: DateRange) -> bool {
    match cursor {
        Some(Cursor::Watermark(ts)) => ts.date_naive() >= range.end,
        _ => false,
    }
}
