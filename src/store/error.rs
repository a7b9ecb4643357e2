use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("failed to write cache data for dataset '{dataset}'")]
    WriteFailed {
        dataset: String,
        #[source]
        source: std::io::Error,
    },

    #[error("watermark for dataset '{dataset}' would move backward")]
    WatermarkConflict { dataset: String },

    #[error("failed to read sync state for dataset '{dataset}'")]
    StateRead {
        dataset: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sync state for dataset '{dataset}' is corrupt")]
    StateDecode {
        dataset: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to scan cache file '{0}'")]
    ParquetScan(PathBuf, #[source] PolarsError),

    #[error("failed processing dataframe: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
