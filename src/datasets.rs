use crate::config::SyncConfig;
use crate::cursor::{CursorStrategy, RequestParams};
use crate::fetch::FetchRequest;
use crate::normalize::schema::{self, RecordSchema, WEATHER_HOURLY_VARIABLES};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chicago Loop, used when no explicit location is given for weather syncs.
pub const DEFAULT_LOCATION: LatLon = LatLon(41.8781, -87.6298);

/// The datasets this crate knows how to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetId {
    TaxiTrips,
    Weather,
}

impl DatasetId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetId::TaxiTrips => "taxi_trips",
            DatasetId::Weather => "weather",
        }
    }

    /// How the upstream API paginates this dataset.
    pub fn strategy(&self) -> CursorStrategy {
        match self {
            DatasetId::TaxiTrips => CursorStrategy::Offset,
            DatasetId::Weather => CursorStrategy::Watermark,
        }
    }

    pub fn schema(&self) -> &'static RecordSchema {
        match self {
            DatasetId::TaxiTrips => schema::taxi_trips(),
            DatasetId::Weather => schema::weather(),
        }
    }

    /// Builds the upstream request for one page of this dataset.
    ///
    /// Taxi trips go to the Socrata SoQL endpoint with explicit paging and a
    /// stable sort, so a given offset always addresses the same slice of the
    /// filtered result set. Weather goes to the Open-Meteo archive, which
    /// returns the whole requested date span in one response; the watermark
    /// narrows `start_date` on resume.
    pub fn build_request(
        &self,
        config: &SyncConfig,
        params: &RequestParams,
        range: DateRange,
        location: LatLon,
    ) -> FetchRequest {
        match self {
            DatasetId::TaxiTrips => {
                // Project only the columns the schema normalizes; unselected
                // Socrata columns never cross the wire.
                let select = self
                    .schema()
                    .fields
                    .iter()
                    .map(|f| f.source)
                    .collect::<Vec<_>>()
                    .join(",");
                let query = vec![
                    ("$select".to_string(), select),
                    ("$limit".to_string(), params.limit.to_string()),
                    ("$offset".to_string(), params.offset.to_string()),
                    (
                        "$order".to_string(),
                        "trip_start_timestamp, trip_id".to_string(),
                    ),
                    (
                        "$where".to_string(),
                        format!(
                            "trip_start_timestamp between '{}T00:00:00' and '{}T23:59:59'",
                            range.start, range.end
                        ),
                    ),
                ];
                FetchRequest::new(
                    config.taxi_base_url.clone(),
                    query,
                    config.app_token.clone(),
                )
            }
            DatasetId::Weather => {
                // Resume from the watermark day; re-fetching the boundary day
                // is harmless because merges are keyed upserts.
                let start = match params.since {
                    Some(since) => since.date_naive().max(range.start).min(range.end),
                    None => range.start,
                };
                let query = vec![
                    ("latitude".to_string(), location.0.to_string()),
                    ("longitude".to_string(), location.1.to_string()),
                    ("start_date".to_string(), start.to_string()),
                    ("end_date".to_string(), range.end.to_string()),
                    ("hourly".to_string(), WEATHER_HOURLY_VARIABLES.to_string()),
                    ("timezone".to_string(), "UTC".to_string()),
                ];
                FetchRequest::new(config.weather_base_url.clone(), query, None)
            }
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latitude, longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon(pub f64, pub f64);

/// Inclusive day-granularity acquisition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    fn january() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
    }

    fn query_value<'a>(request: &'a FetchRequest, name: &str) -> &'a str {
        request
            .query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn taxi_request_pages_with_stable_sort() {
        let params = RequestParams {
            limit: 1000,
            offset: 2000,
            since: None,
        };
        let request = DatasetId::TaxiTrips.build_request(
            &config(),
            &params,
            january(),
            DEFAULT_LOCATION,
        );
        assert_eq!(query_value(&request, "$limit"), "1000");
        assert_eq!(query_value(&request, "$offset"), "2000");
        assert_eq!(
            query_value(&request, "$select"),
            "trip_id,trip_start_timestamp,trip_end_timestamp,trip_seconds,trip_miles,\
             fare,tips,trip_total,payment_type,company,pickup_community_area,\
             dropoff_community_area"
        );
        assert_eq!(query_value(&request, "$order"), "trip_start_timestamp, trip_id");
        assert_eq!(
            query_value(&request, "$where"),
            "trip_start_timestamp between '2024-01-01T00:00:00' and '2024-01-31T23:59:59'"
        );
    }

    #[test]
    fn weather_request_resumes_from_watermark_day() {
        let params = RequestParams {
            limit: 1000,
            offset: 0,
            since: Some(Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap()),
        };
        let request =
            DatasetId::Weather.build_request(&config(), &params, january(), DEFAULT_LOCATION);
        assert_eq!(query_value(&request, "start_date"), "2024-01-15");
        assert_eq!(query_value(&request, "end_date"), "2024-01-31");
        assert_eq!(query_value(&request, "timezone"), "UTC");
    }

    #[test]
    fn weather_request_without_watermark_covers_whole_range() {
        let params = RequestParams {
            limit: 1000,
            offset: 0,
            since: None,
        };
        let request =
            DatasetId::Weather.build_request(&config(), &params, january(), DEFAULT_LOCATION);
        assert_eq!(query_value(&request, "start_date"), "2024-01-01");
        assert_eq!(query_value(&request, "latitude"), "41.8781");
    }
}
