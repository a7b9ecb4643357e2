use chrono::{DateTime, Utc};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// A single normalized value of one canonical field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// The source omitted an optional field. Kept distinct from zero so the
    /// cache can tell "not reported" from "reported as 0".
    Absent,
}

/// One normalized taxi trip or weather observation.
///
/// The natural key is unique within a dataset across repeated fetches;
/// re-fetching an already-present key overwrites the stored record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Natural key (trip id, or station id + observation timestamp).
    pub key: String,
    /// Event time driving watermarks and range reads.
    pub event_time: DateTime<Utc>,
    /// Values aligned with the dataset schema's field order.
    pub values: Vec<FieldValue>,
    /// Provenance timestamp: when this record was fetched from the remote.
    pub fetched_at: DateTime<Utc>,
}

impl Record {
    /// Content hash over the normalized values. The store compares hashes to
    /// tell updated rows from unchanged ones without re-reading full rows.
    ///
    /// FNV-1a over a tag byte plus the little-endian value bytes per field.
    /// The hash is persisted in the cache, so it must produce the same value
    /// for the same record on every toolchain and platform.
    pub fn content_hash(&self) -> u64 {
        let mut h = FNV_OFFSET_BASIS;
        for value in &self.values {
            h = match value {
                FieldValue::Float(v) => fnv1a(fnv1a(h, &[0]), &v.to_bits().to_le_bytes()),
                FieldValue::Int(v) => fnv1a(fnv1a(h, &[1]), &v.to_le_bytes()),
                FieldValue::Text(v) => {
                    let h = fnv1a(fnv1a(h, &[2]), &(v.len() as u64).to_le_bytes());
                    fnv1a(h, v.as_bytes())
                }
                FieldValue::Timestamp(v) => {
                    fnv1a(fnv1a(h, &[3]), &v.timestamp_millis().to_le_bytes())
                }
                FieldValue::Absent => fnv1a(h, &[4]),
            };
        }
        h
    }
}
