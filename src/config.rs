use bon::Builder;
use std::time::Duration;

/// Socrata resource for Chicago taxi trip records.
pub const TAXI_TRIPS_URL: &str = "https://data.cityofchicago.org/resource/ajtu-isnz.json";

/// Open-Meteo historical weather archive. Point this at the forecast endpoint
/// (`https://api.open-meteo.com/v1/forecast`) to sync forecast observations
/// instead.
pub const WEATHER_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Request budget: at most `max_requests` calls per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

/// Everything the acquisition layer needs from the outside world.
///
/// Nothing here is read from process-wide state; build one and hand it to
/// [`crate::Chidata::with_config`].
///
/// # Examples
///
/// ```
/// use chidata::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::builder()
///     .app_token("my-socrata-token".to_string())
///     .page_size(5000)
///     .backoff_base(Duration::from_millis(250))
///     .build();
/// assert_eq!(config.page_size, 5000);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct SyncConfig {
    #[builder(default = TAXI_TRIPS_URL.to_string())]
    pub taxi_base_url: String,
    #[builder(default = WEATHER_ARCHIVE_URL.to_string())]
    pub weather_base_url: String,
    /// Socrata application token, sent as the `X-App-Token` header.
    pub app_token: Option<String>,
    /// Records requested per page. Socrata caps a single request at 50,000.
    #[builder(default = 1000)]
    pub page_size: u32,
    #[builder(default = RateLimit { max_requests: 10, window: Duration::from_secs(60) })]
    pub rate_limit: RateLimit,
    /// Total attempts per fetch, including the first one.
    #[builder(default = 4)]
    pub max_attempts: u32,
    #[builder(default = Duration::from_millis(500))]
    pub backoff_base: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub backoff_cap: Duration,
    /// Upper bound on any single suspension (rate-budget wait or backoff).
    #[builder(default = Duration::from_secs(120))]
    pub suspend_timeout: Duration,
    /// Per-request timeout handed to the HTTP transport.
    #[builder(default = Duration::from_secs(60))]
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_public_endpoints() {
        let config = SyncConfig::default();
        assert_eq!(config.taxi_base_url, TAXI_TRIPS_URL);
        assert_eq!(config.weather_base_url, WEATHER_ARCHIVE_URL);
        assert_eq!(config.app_token, None);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn builder_overrides_stick() {
        let config = SyncConfig::builder()
            .taxi_base_url("http://localhost:8080/trips.json".to_string())
            .page_size(100)
            .max_attempts(2)
            .build();
        assert_eq!(config.taxi_base_url, "http://localhost:8080/trips.json");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_attempts, 2);
    }
}
