//! The network boundary: rate-limited, retrying HTTP fetches of one page of
//! remote records at a time. Nothing in this module mutates shared state, so
//! the whole retry machinery can be exercised against a scripted transport.

mod error;
mod fetcher;
mod rate_limit;
mod transport;

pub use error::FetchError;
pub use fetcher::Fetcher;
pub use rate_limit::RateLimiter;
pub use transport::{HttpTransport, Transport, TransportError, TransportReply};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Describes one outbound call. Owned exclusively by the fetcher for the
/// duration of the call; never shared.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Socrata application token, sent as the `X-App-Token` header.
    pub app_token: Option<String>,
    /// 1-based attempt counter, set by the fetcher on each try.
    pub attempt: u32,
}

impl FetchRequest {
    pub fn new(url: String, query: Vec<(String, String)>, app_token: Option<String>) -> Self {
        Self {
            url,
            query,
            app_token,
            attempt: 0,
        }
    }
}

/// An in-flight, not-yet-committed batch of raw records returned by one
/// fetch call. Exists only between fetch and commit.
#[derive(Debug, Clone)]
pub struct Page {
    pub payload: Value,
    /// Provenance timestamp stamped onto every record normalized from this
    /// page.
    pub fetched_at: DateTime<Utc>,
}
