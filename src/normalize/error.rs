use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("required field '{field}' missing from source record")]
    MissingField { field: &'static str },

    #[error("could not parse '{value}' as a timestamp for field '{field}'")]
    BadTimestamp { field: &'static str, value: String },

    #[error("field '{field}' has unexpected type: expected {expected}, got {got}")]
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
        got: String,
    },

    #[error("payload does not match the expected {0} layout")]
    MalformedPayload(&'static str),
}
