use crate::normalize::error::NormalizeError;
use crate::normalize::schema::{FieldKind, FieldSpec, PayloadShape, RecordSchema};
use crate::record::{FieldValue, Record};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Normalizes a raw payload into records matching `schema`.
///
/// Collecting wrapper around [`normalize_iter`]; the whole page is rejected
/// on the first bad record so a partially-normalized page can never reach
/// the store.
pub fn normalize(
    payload: &Value,
    schema: &'static RecordSchema,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Record>, NormalizeError> {
    normalize_iter(payload, schema, fetched_at)?.collect()
}

/// Lazily normalizes the payload, one record per source row.
///
/// The iterator holds no external state; re-invoking on the same payload
/// restarts from the top.
pub fn normalize_iter(
    payload: &Value,
    schema: &'static RecordSchema,
    fetched_at: DateTime<Utc>,
) -> Result<impl Iterator<Item = Result<Record, NormalizeError>>, NormalizeError> {
    let rows = source_rows(payload, schema)?;
    Ok(rows
        .into_iter()
        .map(move |row| normalize_row(&row, schema, fetched_at)))
}

/// Reshapes the payload into one JSON object per record.
fn source_rows(
    payload: &Value,
    schema: &RecordSchema,
) -> Result<Vec<Map<String, Value>>, NormalizeError> {
    match schema.shape {
        PayloadShape::RowArray => {
            let rows = payload
                .as_array()
                .ok_or(NormalizeError::MalformedPayload("row array"))?;
            rows.iter()
                .map(|row| {
                    row.as_object()
                        .cloned()
                        .ok_or(NormalizeError::MalformedPayload("row array"))
                })
                .collect()
        }
        PayloadShape::HourlyBlock => pivot_hourly_block(payload),
    }
}

/// Pivots Open-Meteo's object-of-parallel-arrays into per-observation rows,
/// injecting a station id derived from the response grid point.
///
/// A payload without an `hourly` block is a valid "nothing new" result.
fn pivot_hourly_block(payload: &Value) -> Result<Vec<Map<String, Value>>, NormalizeError> {
    let root = payload
        .as_object()
        .ok_or(NormalizeError::MalformedPayload("hourly block"))?;
    let Some(hourly) = root.get("hourly") else {
        return Ok(Vec::new());
    };
    let hourly = hourly
        .as_object()
        .ok_or(NormalizeError::MalformedPayload("hourly block"))?;
    let times = hourly
        .get("time")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MalformedPayload("hourly block"))?;

    let lat = root.get("latitude").and_then(Value::as_f64);
    let lon = root.get("longitude").and_then(Value::as_f64);
    let station_id = match (lat, lon) {
        (Some(lat), Some(lon)) => format!("{lat:.4},{lon:.4}"),
        _ => return Err(NormalizeError::MissingField { field: "latitude" }),
    };

    let mut rows = Vec::with_capacity(times.len());
    for (index, time) in times.iter().enumerate() {
        let mut row = Map::new();
        row.insert("station_id".to_string(), Value::String(station_id.clone()));
        row.insert("time".to_string(), time.clone());
        for (variable, values) in hourly {
            if variable == "time" {
                continue;
            }
            if let Some(values) = values.as_array() {
                row.insert(
                    variable.clone(),
                    values.get(index).cloned().unwrap_or(Value::Null),
                );
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

fn normalize_row(
    row: &Map<String, Value>,
    schema: &RecordSchema,
    fetched_at: DateTime<Utc>,
) -> Result<Record, NormalizeError> {
    let mut values = Vec::with_capacity(schema.fields.len());
    for field in schema.fields {
        let value = match row.get(field.source) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(NormalizeError::MissingField {
                        field: field.source,
                    });
                }
                FieldValue::Absent
            }
            Some(raw) => parse_value(raw, field)?,
        };
        values.push(value);
    }

    let key = natural_key(schema, &values)?;
    let event_time = event_time(schema, &values)?;
    Ok(Record {
        key,
        event_time,
        values,
        fetched_at,
    })
}

fn natural_key(schema: &RecordSchema, values: &[FieldValue]) -> Result<String, NormalizeError> {
    let mut parts = Vec::with_capacity(schema.key.len());
    for key_field in schema.key {
        let value = field_by_name(schema, values, key_field)?;
        let part = match value {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339(),
            FieldValue::Absent => {
                return Err(NormalizeError::MissingField { field: key_field })
            }
        };
        parts.push(part);
    }
    Ok(parts.join("|"))
}

fn event_time(
    schema: &RecordSchema,
    values: &[FieldValue],
) -> Result<DateTime<Utc>, NormalizeError> {
    match field_by_name(schema, values, schema.event_time)? {
        FieldValue::Timestamp(ts) => Ok(*ts),
        _ => Err(NormalizeError::MissingField {
            field: schema.event_time,
        }),
    }
}

fn field_by_name<'a>(
    schema: &RecordSchema,
    values: &'a [FieldValue],
    name: &'static str,
) -> Result<&'a FieldValue, NormalizeError> {
    schema
        .fields
        .iter()
        .position(|f| f.name == name)
        .and_then(|idx| values.get(idx))
        .ok_or(NormalizeError::MissingField { field: name })
}

fn parse_value(raw: &Value, field: &FieldSpec) -> Result<FieldValue, NormalizeError> {
    match field.kind {
        FieldKind::Float => {
            // Socrata serves numeric fields as strings; accept both.
            let parsed = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| unexpected(field, "number", raw))?;
            let converted = field.convert.map(|f| f(parsed)).unwrap_or(parsed);
            Ok(FieldValue::Float(converted))
        }
        FieldKind::Int => {
            let parsed = match raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| unexpected(field, "integer", raw))?;
            Ok(FieldValue::Int(parsed))
        }
        FieldKind::Text => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            _ => Err(unexpected(field, "string", raw)),
        },
        FieldKind::Timestamp => {
            let s = raw
                .as_str()
                .ok_or_else(|| unexpected(field, "timestamp string", raw))?;
            parse_timestamp(s, field.source).map(FieldValue::Timestamp)
        }
    }
}

/// Parses the timestamp layouts the two sources actually produce: RFC 3339,
/// Socrata's floating `2024-01-15T10:30:00.000`, and Open-Meteo's minute
/// precision `2024-01-15T10:30`. Naive timestamps are taken as UTC.
pub(crate) fn parse_timestamp(
    s: &str,
    field: &'static str,
) -> Result<DateTime<Utc>, NormalizeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(NormalizeError::BadTimestamp {
        field,
        value: s.to_string(),
    })
}

fn unexpected(field: &FieldSpec, expected: &'static str, raw: &Value) -> NormalizeError {
    let got = match raw {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    NormalizeError::UnexpectedType {
        field: field.source,
        expected,
        got: got.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::schema;
    use chrono::TimeZone;
    use serde_json::json;

    fn trip(id: &str) -> Value {
        json!({
            "trip_id": id,
            "trip_start_timestamp": "2024-01-15T10:30:00.000",
            "trip_end_timestamp": "2024-01-15T10:45:00.000",
            "trip_seconds": "900",
            "trip_miles": "2.5",
            "fare": "12.25",
            "tips": "3.00",
            "trip_total": "15.25",
            "payment_type": "Credit Card",
            "company": "Flash Cab",
            "pickup_community_area": "8"
        })
    }

    #[test]
    fn taxi_row_with_stringly_numbers_normalizes() {
        let payload = json!([trip("abc123")]);
        let records = normalize(&payload, schema::taxi_trips(), Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.key, "abc123");
        assert_eq!(
            record.event_time,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );
        // trip_miles converted to kilometers
        match &record.values[4] {
            FieldValue::Float(km) => assert!((km - 2.5 * 1.609_344).abs() < 1e-9),
            other => panic!("expected Float, got {other:?}"),
        }
        match &record.values[10] {
            FieldValue::Int(area) => assert_eq!(*area, 8),
            other => panic!("expected Int, got {other:?}"),
        }
    }

    #[test]
    fn missing_optional_field_becomes_absent_not_zero() {
        let mut row = trip("t1");
        row.as_object_mut().unwrap().remove("fare");
        let records = normalize(&json!([row]), schema::taxi_trips(), Utc::now()).unwrap();
        assert_eq!(records[0].values[5], FieldValue::Absent);
        // dropoff_community_area never present in the fixture
        assert_eq!(records[0].values[11], FieldValue::Absent);
    }

    #[test]
    fn missing_required_field_fails() {
        let mut row = trip("t1");
        row.as_object_mut().unwrap().remove("trip_id");
        let err = normalize(&json!([row]), schema::taxi_trips(), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::MissingField { field: "trip_id" }
        ));
    }

    #[test]
    fn unparseable_timestamp_fails() {
        let mut row = trip("t1");
        row["trip_start_timestamp"] = json!("not-a-time");
        let err = normalize(&json!([row]), schema::taxi_trips(), Utc::now()).unwrap_err();
        assert!(matches!(err, NormalizeError::BadTimestamp { .. }));
    }

    #[test]
    fn wrong_type_fails_with_unexpected_type() {
        let mut row = trip("t1");
        row["fare"] = json!({"amount": 12});
        let err = normalize(&json!([row]), schema::taxi_trips(), Utc::now()).unwrap_err();
        assert!(matches!(err, NormalizeError::UnexpectedType { .. }));
    }

    #[test]
    fn empty_row_array_yields_no_records() {
        let records = normalize(&json!([]), schema::taxi_trips(), Utc::now()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn hourly_block_pivots_into_keyed_observations() {
        let payload = json!({
            "latitude": 41.875,
            "longitude": -87.625,
            "hourly": {
                "time": ["2024-01-01T00:00", "2024-01-01T01:00"],
                "temperature_2m": [-3.1, -2.8],
                "relative_humidity_2m": [81.0, 79.0],
                "precipitation": [0.0, 0.2],
                "wind_speed_10m": [14.5, 16.1]
            }
        });
        let records = normalize(&payload, schema::weather(), Utc::now()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].key,
            "41.8750,-87.6250|2024-01-01T00:00:00+00:00"
        );
        assert_eq!(
            records[1].event_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
        match &records[1].values[2] {
            FieldValue::Float(t) => assert!((t + 2.8).abs() < 1e-9),
            other => panic!("expected Float, got {other:?}"),
        }
    }

    #[test]
    fn missing_hourly_block_is_nothing_new() {
        let payload = json!({"latitude": 41.875, "longitude": -87.625});
        let records = normalize(&payload, schema::weather(), Utc::now()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn normalize_iter_restarts_on_reinvocation() {
        let payload = json!([trip("a"), trip("b")]);
        let first: Vec<_> = normalize_iter(&payload, schema::taxi_trips(), Utc::now())
            .unwrap()
            .collect();
        let second: Vec<_> = normalize_iter(&payload, schema::taxi_trips(), Utc::now())
            .unwrap()
            .collect();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }
}
