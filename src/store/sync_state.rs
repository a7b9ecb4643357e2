use crate::cursor::Cursor;
use crate::datasets::DateRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent sync run for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Durable per-dataset cursor.
///
/// Rewritten after every committed page, not only at end of run, so a crash
/// mid-run loses nothing that was already committed. Created on first sync
/// of a dataset; never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub dataset_id: String,
    pub watermark: Option<Cursor>,
    /// Range the watermark was accumulated for. An offset cursor is only
    /// meaningful relative to the filtered result set it paged through.
    pub range: Option<DateRange>,
    pub last_run_status: RunStatus,
    pub last_run_at: DateTime<Utc>,
}
