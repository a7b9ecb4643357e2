//! Declarative schemas mapping source payload fields to canonical columns.

/// Canonical column type for a normalized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    Text,
    Timestamp,
}

/// Mapping from one source field to one canonical column.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field name as it appears in the raw payload.
    pub source: &'static str,
    /// Canonical column name in the cache store.
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Unit conversion applied to numeric values after parsing.
    pub convert: Option<fn(f64) -> f64>,
}

/// How the raw payload lays out its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Top-level JSON array of record objects (Socrata).
    RowArray,
    /// Object with parallel arrays under an `hourly` block, one entry per
    /// observation (Open-Meteo).
    HourlyBlock,
}

/// The full declarative schema for one dataset.
pub struct RecordSchema {
    pub shape: PayloadShape,
    pub fields: &'static [FieldSpec],
    /// Canonical field name(s) forming the natural key.
    pub key: &'static [&'static str],
    /// Canonical timestamp field that drives watermarks and range reads.
    pub event_time: &'static str,
}

pub fn miles_to_km(miles: f64) -> f64 {
    miles * 1.609_344
}

pub fn fahrenheit_to_celsius(degrees: f64) -> f64 {
    (degrees - 32.0) * 5.0 / 9.0
}

/// Hourly variables requested from Open-Meteo, matching [`WEATHER_FIELDS`].
pub const WEATHER_HOURLY_VARIABLES: &str =
    "temperature_2m,relative_humidity_2m,precipitation,wind_speed_10m";

static TAXI_FIELDS: [FieldSpec; 12] = [
    FieldSpec {
        source: "trip_id",
        name: "trip_id",
        kind: FieldKind::Text,
        required: true,
        convert: None,
    },
    FieldSpec {
        source: "trip_start_timestamp",
        name: "trip_start",
        kind: FieldKind::Timestamp,
        required: true,
        convert: None,
    },
    FieldSpec {
        source: "trip_end_timestamp",
        name: "trip_end",
        kind: FieldKind::Timestamp,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "trip_seconds",
        name: "trip_seconds",
        kind: FieldKind::Int,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "trip_miles",
        name: "trip_km",
        kind: FieldKind::Float,
        required: false,
        convert: Some(miles_to_km),
    },
    FieldSpec {
        source: "fare",
        name: "fare",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "tips",
        name: "tips",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "trip_total",
        name: "trip_total",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "payment_type",
        name: "payment_type",
        kind: FieldKind::Text,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "company",
        name: "company",
        kind: FieldKind::Text,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "pickup_community_area",
        name: "pickup_community_area",
        kind: FieldKind::Int,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "dropoff_community_area",
        name: "dropoff_community_area",
        kind: FieldKind::Int,
        required: false,
        convert: None,
    },
];

static TAXI_SCHEMA: RecordSchema = RecordSchema {
    shape: PayloadShape::RowArray,
    fields: &TAXI_FIELDS,
    key: &["trip_id"],
    event_time: "trip_start",
};

static WEATHER_FIELDS: [FieldSpec; 6] = [
    FieldSpec {
        source: "station_id",
        name: "station_id",
        kind: FieldKind::Text,
        required: true,
        convert: None,
    },
    FieldSpec {
        source: "time",
        name: "observed_at",
        kind: FieldKind::Timestamp,
        required: true,
        convert: None,
    },
    FieldSpec {
        source: "temperature_2m",
        name: "temperature_c",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "relative_humidity_2m",
        name: "relative_humidity",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "precipitation",
        name: "precipitation_mm",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
    FieldSpec {
        source: "wind_speed_10m",
        name: "wind_speed_kmh",
        kind: FieldKind::Float,
        required: false,
        convert: None,
    },
];

static WEATHER_SCHEMA: RecordSchema = RecordSchema {
    shape: PayloadShape::HourlyBlock,
    fields: &WEATHER_FIELDS,
    key: &["station_id", "observed_at"],
    event_time: "observed_at",
};

pub fn taxi_trips() -> &'static RecordSchema {
    &TAXI_SCHEMA
}

pub fn weather() -> &'static RecordSchema {
    &WEATHER_SCHEMA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversions() {
        assert!((miles_to_km(1.0) - 1.609_344).abs() < 1e-9);
        assert!((fahrenheit_to_celsius(32.0)).abs() < 1e-9);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn key_fields_are_required() {
        for schema in [taxi_trips(), weather()] {
            for key in schema.key {
                let field = schema
                    .fields
                    .iter()
                    .find(|f| f.name == *key)
                    .expect("key field must exist in schema");
                assert!(field.required, "key field '{key}' must be required");
            }
        }
    }
}
