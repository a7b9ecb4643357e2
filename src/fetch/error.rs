use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// A suspension (rate-budget wait or retry backoff) would exceed the
    /// configured bound.
    #[error("timed out: {reason} would suspend the caller longer than {limit:?}")]
    Timeout {
        reason: &'static str,
        limit: Duration,
    },

    #[error("giving up on {url} after {attempts} attempts")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    /// The remote rejected the request outright (4xx other than rate-limit).
    /// Retrying will not help.
    #[error("request to {url} rejected with HTTP {status}")]
    RejectedRequest { url: String, status: u16 },

    /// A failure worth retrying: timeout, 5xx, connection reset, or an
    /// explicit rate-limited response. Surfaces only as the `last` cause of
    /// [`FetchError::ExhaustedRetries`].
    #[error("transient failure for {url}: {reason}")]
    Transient { url: String, reason: String },
}
