use crate::fetch::FetchRequest;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Raw HTTP reply, before any failure classification.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    /// Parsed JSON body for successful replies; `Value::Null` otherwise.
    pub body: Value,
}

/// Failure below the HTTP status level. Always classified as transient by
/// the fetcher.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Boundary to the network. Substitutable in tests so retry and rate-limit
/// behavior can run against a scripted remote.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &FetchRequest) -> Result<TransportReply, TransportError>;
}

/// Production transport backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &FetchRequest) -> Result<TransportReply, TransportError> {
        debug!("GET {} ({} query params)", request.url, request.query.len());
        let mut builder = self
            .client
            .get(&request.url)
            .query(&request.query)
            .timeout(self.request_timeout);
        if let Some(token) = &request.app_token {
            builder = builder.header("X-App-Token", token);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = if response.status().is_success() {
            response.json::<Value>().await.map_err(classify)?
        } else {
            Value::Null
        };
        Ok(TransportReply { status, body })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(error.to_string())
    }
}
