mod chidata;
mod config;
mod cursor;
mod datasets;
mod error;
mod fetch;
mod normalize;
mod record;
mod store;
mod sync;
mod utils;

pub use chidata::Chidata;
pub use error::ChidataError;

pub use config::{RateLimit, SyncConfig, TAXI_TRIPS_URL, WEATHER_ARCHIVE_URL};
pub use cursor::{Cursor, CursorStrategy, RequestParams};
pub use datasets::{DatasetId, DateRange, LatLon, DEFAULT_LOCATION};

pub use fetch::{
    FetchError, FetchRequest, Fetcher, HttpTransport, Page, RateLimiter, Transport,
    TransportError, TransportReply,
};
pub use normalize::{normalize, normalize_iter, schema, NormalizeError};
pub use record::{FieldValue, Record};
pub use store::{CacheStore, MergeResult, RunStatus, StoreError, SyncState};
pub use sync::{SyncOrchestrator, SyncResult, SyncStatus};
