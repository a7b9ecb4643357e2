use crate::cursor::Cursor;
use crate::datasets::{DatasetId, DateRange};
use crate::normalize::schema::{FieldKind, RecordSchema};
use crate::record::{FieldValue, Record};
use crate::store::error::StoreError;
use crate::store::sync_state::{RunStatus, SyncState};
use chrono::{Days, NaiveDateTime, NaiveTime, Utc};
use log::{debug, info};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tokio::{fs, task};

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of merging one page into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl MergeResult {
    pub fn absorb(&mut self, other: MergeResult) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Incremental cache store: one Parquet data file and one JSON sync-state
/// sidecar per dataset.
///
/// Merges are upserts keyed by natural key with last-write-wins semantics.
/// A page commit writes the data file first and the watermark second, each
/// via temp-file-then-rename, so readers always observe a complete file and
/// a failed commit leaves the watermark at its pre-page value. Writes are
/// serialized per dataset; reads never take a lock.
pub struct CacheStore {
    cache_dir: PathBuf,
    locks: Mutex<HashMap<DatasetId, Arc<Mutex<()>>>>,
    #[cfg(test)]
    pub(crate) fail_writes: AtomicBool,
}

impl CacheStore {
    pub async fn new(cache_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| StoreError::CacheDirCreation(cache_dir.to_path_buf(), e))?;
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
            #[cfg(test)]
            fail_writes: AtomicBool::new(false),
        })
    }

    fn data_path(&self, dataset: DatasetId) -> PathBuf {
        self.cache_dir.join(format!("{dataset}.parquet"))
    }

    fn state_path(&self, dataset: DatasetId) -> PathBuf {
        self.cache_dir.join(format!("{dataset}.state.json"))
    }

    /// Per-dataset write lock: commits for one dataset are serialized, while
    /// different datasets never contend with each other.
    async fn dataset_lock(&self, dataset: DatasetId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(dataset)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reads the persisted sync state, if the dataset has ever been synced.
    pub async fn sync_state(&self, dataset: DatasetId) -> Result<Option<SyncState>, StoreError> {
        match fs::read(self.state_path(dataset)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::StateDecode {
                    dataset: dataset.to_string(),
                    source: e,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::StateRead {
                dataset: dataset.to_string(),
                source: e,
            }),
        }
    }

    /// The last successfully committed cursor, if any.
    pub async fn watermark(&self, dataset: DatasetId) -> Result<Option<Cursor>, StoreError> {
        Ok(self.sync_state(dataset).await?.and_then(|s| s.watermark))
    }

    /// Upserts `records` without touching the watermark.
    pub async fn merge(
        &self,
        dataset: DatasetId,
        records: &[Record],
    ) -> Result<MergeResult, StoreError> {
        let lock = self.dataset_lock(dataset).await;
        let _guard = lock.lock().await;
        self.merge_unlocked(dataset, records).await
    }

    /// Advances the watermark without merging data. Fails with
    /// [`StoreError::WatermarkConflict`] if the cursor would move backward
    /// within the same range.
    pub async fn commit_watermark(
        &self,
        dataset: DatasetId,
        cursor: Cursor,
        range: DateRange,
    ) -> Result<(), StoreError> {
        let lock = self.dataset_lock(dataset).await;
        let _guard = lock.lock().await;
        self.check_monotonic(dataset, &cursor, range).await?;
        self.write_state(dataset, Some(cursor), Some(range), RunStatus::Partial)
            .await
    }

    /// Transactionally commits one page: merges `records` and advances the
    /// watermark to `cursor` under a single dataset lock. On any write
    /// failure nothing is committed and the watermark keeps its pre-page
    /// value, which is what makes a crashed run safely resumable.
    pub async fn commit_page(
        &self,
        dataset: DatasetId,
        records: &[Record],
        cursor: Cursor,
        range: DateRange,
    ) -> Result<MergeResult, StoreError> {
        let lock = self.dataset_lock(dataset).await;
        let _guard = lock.lock().await;
        self.check_monotonic(dataset, &cursor, range).await?;
        let merged = self.merge_unlocked(dataset, records).await?;
        self.write_state(dataset, Some(cursor), Some(range), RunStatus::Partial)
            .await?;
        debug!(
            "committed page for {dataset}: {} inserted, {} updated, {} unchanged",
            merged.inserted, merged.updated, merged.unchanged
        );
        Ok(merged)
    }

    /// Records the terminal status of a run, preserving watermark and range.
    pub async fn mark_finished(
        &self,
        dataset: DatasetId,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let lock = self.dataset_lock(dataset).await;
        let _guard = lock.lock().await;
        let state = self.sync_state(dataset).await?;
        let (watermark, range) = state.map(|s| (s.watermark, s.range)).unwrap_or((None, None));
        self.write_state(dataset, watermark, range, status).await
    }

    /// Returns the committed records of `dataset` whose event time falls in
    /// `range`, as a lazy frame. Lock-free: data files are replaced by
    /// atomic rename, so a reader sees either the previous or the new
    /// complete file, never a partial page.
    pub fn read(&self, dataset: DatasetId, range: DateRange) -> Result<LazyFrame, StoreError> {
        let path = self.data_path(dataset);
        if !path.exists() {
            return Ok(DataFrame::empty().lazy());
        }
        let start = NaiveDateTime::new(range.start, NaiveTime::MIN);
        let end_exclusive = NaiveDateTime::new(
            range.end.checked_add_days(Days::new(1)).unwrap_or(range.end),
            NaiveTime::MIN,
        );
        let frame = LazyFrame::scan_parquet(&path, Default::default())
            .map_err(|e| StoreError::ParquetScan(path.clone(), e))?;
        Ok(frame.filter(
            col("event_time")
                .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
                .gt_eq(lit(start))
                .and(
                    col("event_time")
                        .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
                        .lt(lit(end_exclusive)),
                ),
        ))
    }

    async fn check_monotonic(
        &self,
        dataset: DatasetId,
        cursor: &Cursor,
        range: DateRange,
    ) -> Result<(), StoreError> {
        if let Some(state) = self.sync_state(dataset).await? {
            // A cursor is only comparable against a watermark accumulated
            // for the same range; a range change restarts pagination.
            if state.range == Some(range) {
                if let Some(current) = state.watermark {
                    if moves_backward(&current, cursor) {
                        return Err(StoreError::WatermarkConflict {
                            dataset: dataset.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn merge_unlocked(
        &self,
        dataset: DatasetId,
        records: &[Record],
    ) -> Result<MergeResult, StoreError> {
        if records.is_empty() {
            return Ok(MergeResult::default());
        }
        let path = self.data_path(dataset);
        let existing = if fs::metadata(&path).await.is_ok() {
            let frame = LazyFrame::scan_parquet(&path, Default::default())
                .map_err(|e| StoreError::ParquetScan(path.clone(), e))?
                .collect()?;
            Some(frame)
        } else {
            None
        };

        let mut result = MergeResult::default();
        let known = match &existing {
            Some(frame) => key_hashes(frame)?,
            None => HashMap::new(),
        };
        for record in records {
            match known.get(record.key.as_str()) {
                None => result.inserted += 1,
                Some(hash) if *hash == record.content_hash() => result.unchanged += 1,
                Some(_) => result.updated += 1,
            }
        }

        let incoming = records_to_frame(dataset.schema(), records)?;
        let combined = match existing {
            Some(frame) => frame.vstack(&incoming)?,
            None => incoming,
        };
        // Incoming rows sit below existing ones, so keep-last by natural key
        // implements last-write-wins by fetch provenance.
        let deduped = combined
            .lazy()
            .unique_stable(Some(vec!["natural_key".into()]), UniqueKeepStrategy::Last)
            .collect()?;

        self.write_parquet(dataset, deduped).await?;
        info!(
            "merged {} records into {dataset} ({} inserted, {} updated, {} unchanged)",
            records.len(),
            result.inserted,
            result.updated,
            result.unchanged
        );
        Ok(result)
    }

    /// Writes the full dataset frame to a temp file in the cache directory
    /// and renames it over the data file.
    async fn write_parquet(&self, dataset: DatasetId, frame: DataFrame) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::WriteFailed {
                dataset: dataset.to_string(),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        let dir = self.cache_dir.clone();
        let path = self.data_path(dataset);
        let dataset_name = dataset.to_string();
        task::spawn_blocking(move || {
            let mut frame = frame;
            let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::WriteFailed {
                dataset: dataset_name.clone(),
                source: e,
            })?;
            ParquetWriter::new(tmp.as_file_mut())
                .with_compression(ParquetCompression::Snappy)
                .finish(&mut frame)?;
            tmp.persist(&path).map_err(|e| StoreError::WriteFailed {
                dataset: dataset_name,
                source: e.error,
            })?;
            Ok::<(), StoreError>(())
        })
        .await??;
        Ok(())
    }

    async fn write_state(
        &self,
        dataset: DatasetId,
        watermark: Option<Cursor>,
        range: Option<DateRange>,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let state = SyncState {
            dataset_id: dataset.as_str().to_string(),
            watermark,
            range,
            last_run_status: status,
            last_run_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&state).map_err(|e| StoreError::StateDecode {
            dataset: dataset.to_string(),
            source: e,
        })?;
        let path = self.state_path(dataset);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::WriteFailed {
                dataset: dataset.to_string(),
                source: e,
            })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::WriteFailed {
                dataset: dataset.to_string(),
                source: e,
            })
    }
}

fn moves_backward(current: &Cursor, next: &Cursor) -> bool {
    match (current, next) {
        (Cursor::Offset(a), Cursor::Offset(b)) => b < a,
        (Cursor::Watermark(a), Cursor::Watermark(b)) => b < a,
        // A strategy change restarts pagination; not a rewind.
        _ => false,
    }
}

/// Extracts the `natural_key -> row_hash` map used to classify incoming
/// records as inserted, updated, or unchanged.
fn key_hashes(frame: &DataFrame) -> Result<HashMap<String, u64>, StoreError> {
    let keys = frame.column("natural_key")?.str()?;
    let hashes = frame.column("row_hash")?.u64()?;
    let mut map = HashMap::with_capacity(frame.height());
    for (key, hash) in keys.into_iter().zip(hashes.into_iter()) {
        if let (Some(key), Some(hash)) = (key, hash) {
            map.insert(key.to_string(), hash);
        }
    }
    Ok(map)
}

/// Builds the columnar frame for one page: natural key, event time, the
/// schema's canonical fields, provenance timestamp, and content hash.
fn records_to_frame(
    schema: &'static RecordSchema,
    records: &[Record],
) -> Result<DataFrame, StoreError> {
    let mut columns = Vec::with_capacity(schema.fields.len() + 4);

    let keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
    columns.push(Column::new("natural_key".into(), keys));

    let event_times: Vec<Option<i64>> = records
        .iter()
        .map(|r| Some(r.event_time.timestamp_millis()))
        .collect();
    columns.push(
        Column::new("event_time".into(), event_times)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
    );

    for (index, field) in schema.fields.iter().enumerate() {
        let column = match field.kind {
            FieldKind::Float => {
                let values: Vec<Option<f64>> = records
                    .iter()
                    .map(|r| match r.values.get(index) {
                        Some(FieldValue::Float(v)) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Column::new(field.name.into(), values)
            }
            FieldKind::Int => {
                let values: Vec<Option<i64>> = records
                    .iter()
                    .map(|r| match r.values.get(index) {
                        Some(FieldValue::Int(v)) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Column::new(field.name.into(), values)
            }
            FieldKind::Text => {
                let values: Vec<Option<String>> = records
                    .iter()
                    .map(|r| match r.values.get(index) {
                        Some(FieldValue::Text(v)) => Some(v.clone()),
                        _ => None,
                    })
                    .collect();
                Column::new(field.name.into(), values)
            }
            FieldKind::Timestamp => {
                let values: Vec<Option<i64>> = records
                    .iter()
                    .map(|r| match r.values.get(index) {
                        Some(FieldValue::Timestamp(v)) => Some(v.timestamp_millis()),
                        _ => None,
                    })
                    .collect();
                Column::new(field.name.into(), values)
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            }
        };
        columns.push(column);
    }

    let fetched: Vec<Option<i64>> = records
        .iter()
        .map(|r| Some(r.fetched_at.timestamp_millis()))
        .collect();
    columns.push(
        Column::new("fetched_at".into(), fetched)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
    );

    let hashes: Vec<u64> = records.iter().map(|r| r.content_hash()).collect();
    columns.push(Column::new("row_hash".into(), hashes));

    Ok(DataFrame::new(columns)?)
}
