//! Pagination cursors: how far into a remote dataset a sync has progressed,
//! and how to compute the next page request from that position.

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a dataset sync within the remote collection.
///
/// Persisted as part of the sync state, so it must only ever move forward;
/// the store rejects commits that would rewind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Cursor {
    /// Number of records already committed; the next request starts here.
    Offset(u64),
    /// Event time of the newest committed record; the next request asks for
    /// records at or after it (inclusive, dedup handles the boundary).
    Watermark(DateTime<Utc>),
}

/// Which pagination scheme a dataset uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStrategy {
    /// Fixed page size, integer offset. Terminates when a page comes back
    /// shorter than requested.
    Offset,
    /// Timestamp watermark. Terminates when a page comes back empty.
    Watermark,
}

/// Parameters for the next page request, derived from the current cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub limit: u32,
    pub offset: u64,
    pub since: Option<DateTime<Utc>>,
}

impl CursorStrategy {
    /// Computes the request parameters for the page that follows `cursor`.
    pub fn next(&self, cursor: Option<&Cursor>, page_size: u32) -> RequestParams {
        match self {
            CursorStrategy::Offset => {
                // A watermark persisted by a different strategy is ignored and
                // pagination restarts from the beginning.
                let offset = match cursor {
                    Some(Cursor::Offset(n)) => *n,
                    _ => 0,
                };
                RequestParams {
                    limit: page_size,
                    offset,
                    since: None,
                }
            }
            CursorStrategy::Watermark => {
                let since = match cursor {
                    Some(Cursor::Watermark(ts)) => Some(*ts),
                    _ => None,
                };
                RequestParams {
                    limit: page_size,
                    offset: 0,
                    since,
                }
            }
        }
    }

    /// Advances the cursor past an accepted page of normalized records.
    ///
    /// An empty page leaves the cursor where it was; for a watermark cursor
    /// the new position is the maximum event time seen so far, never less
    /// than the current one.
    pub fn advance(&self, cursor: Option<&Cursor>, records: &[Record]) -> Option<Cursor> {
        match self {
            CursorStrategy::Offset => {
                let base = match cursor {
                    Some(Cursor::Offset(n)) => *n,
                    _ => 0,
                };
                Some(Cursor::Offset(base + records.len() as u64))
            }
            CursorStrategy::Watermark => {
                let max_seen = records.iter().map(|r| r.event_time).max();
                match (cursor, max_seen) {
                    (Some(Cursor::Watermark(current)), Some(max)) => {
                        Some(Cursor::Watermark((*current).max(max)))
                    }
                    (_, Some(max)) => Some(Cursor::Watermark(max)),
                    (Some(current), None) => Some(*current),
                    (None, None) => None,
                }
            }
        }
    }

    /// Whether a page of `records_in_page` records was the last one the
    /// remote will produce for this query.
    pub fn exhausted(&self, records_in_page: usize, page_size: u32) -> bool {
        match self {
            CursorStrategy::Offset => records_in_page < page_size as usize,
            CursorStrategy::Watermark => records_in_page == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use chrono::TimeZone;

    fn record_at(hour: u32) -> Record {
        Record {
            key: format!("k{hour}"),
            event_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            values: vec![FieldValue::Absent],
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn offset_advances_by_page_record_count() {
        let strategy = CursorStrategy::Offset;
        let page: Vec<Record> = (0..3).map(record_at).collect();
        let cursor = strategy.advance(None, &page);
        assert_eq!(cursor, Some(Cursor::Offset(3)));
        let cursor = strategy.advance(cursor.as_ref(), &page);
        assert_eq!(cursor, Some(Cursor::Offset(6)));
    }

    #[test]
    fn offset_next_starts_at_cursor() {
        let params = CursorStrategy::Offset.next(Some(&Cursor::Offset(150)), 100);
        assert_eq!(params.offset, 150);
        assert_eq!(params.limit, 100);
        assert_eq!(params.since, None);
    }

    #[test]
    fn offset_terminates_on_short_page() {
        let strategy = CursorStrategy::Offset;
        assert!(!strategy.exhausted(100, 100));
        assert!(strategy.exhausted(50, 100));
        assert!(strategy.exhausted(0, 100));
    }

    #[test]
    fn watermark_tracks_max_event_time() {
        let strategy = CursorStrategy::Watermark;
        let page: Vec<Record> = vec![record_at(5), record_at(9), record_at(7)];
        let cursor = strategy.advance(None, &page);
        assert_eq!(
            cursor,
            Some(Cursor::Watermark(
                Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn watermark_never_moves_backward_on_advance() {
        let strategy = CursorStrategy::Watermark;
        let high = Cursor::Watermark(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let page = vec![record_at(3)];
        assert_eq!(strategy.advance(Some(&high), &page), Some(high));
    }

    #[test]
    fn empty_first_page_is_valid_nothing_new() {
        let strategy = CursorStrategy::Watermark;
        assert!(strategy.exhausted(0, 100));
        assert_eq!(strategy.advance(None, &[]), None);
    }

    #[test]
    fn foreign_cursor_shape_restarts_pagination() {
        let watermark = Cursor::Watermark(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let params = CursorStrategy::Offset.next(Some(&watermark), 100);
        assert_eq!(params.offset, 0);
    }
}
