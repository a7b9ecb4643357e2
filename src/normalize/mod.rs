//! Converts heterogeneous API payloads (row arrays with stringly-typed
//! numbers, columnar hourly blocks) into records with a canonical schema.

mod error;
mod normalizer;
pub mod schema;

pub use error::NormalizeError;
pub use normalizer::{normalize, normalize_iter};
