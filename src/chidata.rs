//! The main entry point for acquiring Chicago open data. Syncs taxi trip
//! records and hourly weather observations into a local Parquet cache and
//! serves them back as Polars `LazyFrame`s.

use crate::config::SyncConfig;
use crate::cursor::Cursor;
use crate::datasets::{DatasetId, DateRange, LatLon, DEFAULT_LOCATION};
use crate::error::ChidataError;
use crate::fetch::{Fetcher, HttpTransport, Transport};
use crate::store::CacheStore;
use crate::sync::{SyncOrchestrator, SyncResult};
use crate::utils::{ensure_cache_dir_exists, get_cache_dir};
use bon::bon;
use chrono::NaiveDate;
use polars::prelude::LazyFrame;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The main client for syncing and reading Chicago taxi and weather data.
///
/// Each dataset is cached as one Parquet file plus a JSON sync-state sidecar
/// in the cache directory. Syncs are incremental: a second sync over the same
/// date range fetches nothing (or only what is new), and an interrupted sync
/// resumes from its last committed page.
///
/// Create an instance with [`Chidata::new()`] for default behavior (standard
/// cache directory, public API endpoints) or [`Chidata::with_config()`] to
/// supply an app token, custom endpoints, or tuned rate limits.
///
/// # Examples
///
/// ```rust,no_run
/// # use chidata::{Chidata, ChidataError, DatasetId};
/// # use chrono::NaiveDate;
/// # async fn run() -> Result<(), ChidataError> {
/// let client = Chidata::new().await?;
/// let result = client
///     .sync()
///     .dataset(DatasetId::TaxiTrips)
///     .start(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
///     .end(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
///     .call()
///     .await?;
/// println!("committed {} records", result.records_committed);
/// # Ok(())
/// # }
/// ```
pub struct Chidata {
    store: Arc<CacheStore>,
    orchestrator: SyncOrchestrator,
}

#[bon]
impl Chidata {
    /// Creates a client with the default configuration and cache directory.
    ///
    /// The cache directory is determined via the `dirs` crate, typically
    /// `~/.cache/chidata_cache` on Linux.
    ///
    /// # Errors
    ///
    /// Returns [`ChidataError::CacheDirResolution`] if the system cache
    /// directory cannot be determined, or [`ChidataError::CacheDirCreation`]
    /// if it cannot be created.
    pub async fn new() -> Result<Self, ChidataError> {
        let cache_folder = get_cache_dir().map_err(ChidataError::CacheDirResolution)?;
        Self::with_cache_folder(cache_folder).await
    }

    /// Creates a client with the default configuration and a custom cache
    /// directory. The directory is created if it does not exist.
    pub async fn with_cache_folder(cache_folder: PathBuf) -> Result<Self, ChidataError> {
        Self::with_config(SyncConfig::default(), cache_folder).await
    }

    /// Creates a client with a custom [`SyncConfig`], using the real HTTP
    /// transport.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use chidata::{Chidata, ChidataError, SyncConfig};
    /// # use std::path::PathBuf;
    /// # async fn run() -> Result<(), ChidataError> {
    /// let config = SyncConfig::builder()
    ///     .app_token("my-socrata-token".to_string())
    ///     .page_size(5000)
    ///     .build();
    /// let client = Chidata::with_config(config, PathBuf::from("/tmp/chidata")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_config(
        config: SyncConfig,
        cache_folder: PathBuf,
    ) -> Result<Self, ChidataError> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout));
        Self::with_transport(config, cache_folder, transport).await
    }

    /// Creates a client with a custom [`Transport`]. This is the seam tests
    /// use to script upstream responses without a network.
    pub async fn with_transport(
        config: SyncConfig,
        cache_folder: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ChidataError> {
        ensure_cache_dir_exists(&cache_folder)
            .await
            .map_err(|e| ChidataError::CacheDirCreation(cache_folder.clone(), e))?;
        let store = Arc::new(CacheStore::new(&cache_folder).await?);
        let fetcher = Arc::new(Fetcher::new(transport, &config));
        Ok(Self {
            orchestrator: SyncOrchestrator::new(store.clone(), fetcher, config),
            store,
        })
    }

    /// Syncs one dataset over an inclusive date range.
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.dataset(DatasetId)`: **Required.** Which dataset to sync.
    /// * `.start(NaiveDate)` / `.end(NaiveDate)`: **Required.** Inclusive
    ///   bounds on the event-time window to acquire.
    /// * `.location(LatLon)`: Optional. Grid point for weather syncs.
    ///   Defaults to the Chicago Loop; ignored for taxi trips.
    /// * `.cancel(CancellationToken)`: Optional. Checked between pages; a
    ///   cancelled sync keeps everything committed so far.
    ///
    /// # Returns
    ///
    /// A [`SyncResult`] describing what happened. Per-page failures do not
    /// surface as `Err`: they end the run with
    /// [`SyncStatus::Failed`](crate::sync::SyncStatus::Failed) and the error
    /// attached to the result, with all prior pages durably committed.
    #[builder]
    pub async fn sync(
        &self,
        dataset: DatasetId,
        start: NaiveDate,
        end: NaiveDate,
        location: Option<LatLon>,
        cancel: Option<CancellationToken>,
    ) -> Result<SyncResult, ChidataError> {
        let range = DateRange::new(start, end);
        let location = location.unwrap_or(DEFAULT_LOCATION);
        self.orchestrator
            .sync(dataset, range, location, cancel.as_ref())
            .await
    }

    /// Reads committed records of one dataset within an inclusive date range
    /// as a Polars `LazyFrame`.
    ///
    /// Reads never block on a concurrent sync and never observe a partially
    /// written page. A dataset that has never been synced yields an empty
    /// frame.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use chidata::{Chidata, ChidataError, DatasetId};
    /// # use chrono::NaiveDate;
    /// # use polars::prelude::*;
    /// # async fn run() -> Result<(), ChidataError> {
    /// # let client = Chidata::new().await?;
    /// let trips = client
    ///     .read()
    ///     .dataset(DatasetId::TaxiTrips)
    ///     .start(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    ///     .end(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap())
    ///     .call()?
    ///     .collect()
    ///     .unwrap();
    /// println!("{trips}");
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub fn read(
        &self,
        dataset: DatasetId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<LazyFrame, ChidataError> {
        Ok(self.store.read(dataset, DateRange::new(start, end))?)
    }

    /// The last committed cursor for a dataset, if it has ever been synced.
    pub async fn watermark(&self, dataset: DatasetId) -> Result<Option<Cursor>, ChidataError> {
        Ok(self.store.watermark(dataset).await?)
    }
}
