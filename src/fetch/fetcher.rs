use crate::config::SyncConfig;
use crate::fetch::error::FetchError;
use crate::fetch::rate_limit::RateLimiter;
use crate::fetch::transport::{Transport, TransportError};
use crate::fetch::{FetchRequest, Page};
use chrono::Utc;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Issues authenticated, rate-limited GET requests and retries transient
/// failures with exponential backoff plus jitter.
///
/// Pure boundary component: beyond the network call it mutates nothing, so a
/// scripted [`Transport`] makes its behavior fully deterministic in tests.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    suspend_timeout: Duration,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: &SyncConfig) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(config.rate_limit),
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            suspend_timeout: config.suspend_timeout,
        }
    }

    /// Fetches one page.
    ///
    /// Transient failures (timeout, 5xx, connection reset, HTTP 429) are
    /// retried up to the configured attempt count and never surface on their
    /// own; exceeding the count yields [`FetchError::ExhaustedRetries`].
    /// Permanent rejections (other 4xx) fail immediately and are never
    /// retried.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Page, FetchError> {
        let mut request = request.clone();
        let mut last_transient: Option<FetchError> = None;

        for attempt in 1..=self.max_attempts {
            request.attempt = attempt;
            if attempt > 1 {
                let delay = self.backoff_delay(attempt);
                if delay > self.suspend_timeout {
                    return Err(FetchError::Timeout {
                        reason: "retry backoff",
                        limit: self.suspend_timeout,
                    });
                }
                debug!(
                    "backing off {:?} before attempt {}/{} for {}",
                    delay, attempt, self.max_attempts, request.url
                );
                sleep(delay).await;
            }
            self.limiter.acquire(self.suspend_timeout).await?;

            match self.transport.get(&request).await {
                Ok(reply) if matches!(reply.status, 200..=299) => {
                    debug!(
                        "fetched {} (HTTP {}, attempt {})",
                        request.url, reply.status, attempt
                    );
                    return Ok(Page {
                        payload: reply.body,
                        fetched_at: Utc::now(),
                    });
                }
                Ok(reply) if reply.status == 429 || reply.status >= 500 => {
                    warn!(
                        "transient HTTP {} from {} (attempt {}/{})",
                        reply.status, request.url, attempt, self.max_attempts
                    );
                    last_transient = Some(FetchError::Transient {
                        url: request.url.clone(),
                        reason: format!("HTTP {}", reply.status),
                    });
                }
                Ok(reply) => {
                    warn!("request to {} rejected with HTTP {}", request.url, reply.status);
                    return Err(FetchError::RejectedRequest {
                        url: request.url.clone(),
                        status: reply.status,
                    });
                }
                Err(TransportError::Timeout) => {
                    warn!(
                        "request to {} timed out (attempt {}/{})",
                        request.url, attempt, self.max_attempts
                    );
                    last_transient = Some(FetchError::Transient {
                        url: request.url.clone(),
                        reason: "request timed out".to_string(),
                    });
                }
                Err(TransportError::Connection(reason)) => {
                    warn!(
                        "connection to {} failed: {} (attempt {}/{})",
                        request.url, reason, attempt, self.max_attempts
                    );
                    last_transient = Some(FetchError::Transient {
                        url: request.url.clone(),
                        reason,
                    });
                }
            }
        }

        let last = last_transient.unwrap_or_else(|| FetchError::Transient {
            url: request.url.clone(),
            reason: "no response".to_string(),
        });
        Err(FetchError::ExhaustedRetries {
            url: request.url,
            attempts: self.max_attempts,
            last: Box::new(last),
        })
    }

    /// Exponential backoff capped at the configured ceiling, with up to one
    /// extra base interval of jitter so concurrent syncs fan out.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let base_ms = self.backoff_base.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1u64 << exp);
        let capped = scaled.min(self.backoff_cap.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=base_ms.min(capped.max(1)));
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimit;
    use crate::fetch::transport::TransportReply;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Serves a pre-programmed sequence of replies, then repeats the last one.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<TransportReply, TransportError>>>,
        fallback: u16,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<TransportReply, TransportError>>, fallback: u16) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn always(status: u16) -> Self {
            Self::new(Vec::new(), status)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _request: &FetchRequest) -> Result<TransportReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().await.pop_front() {
                Some(reply) => reply,
                None => Ok(TransportReply {
                    status: self.fallback,
                    body: json!([]),
                }),
            }
        }
    }

    fn config(max_attempts: u32) -> SyncConfig {
        SyncConfig::builder()
            .max_attempts(max_attempts)
            .backoff_base(Duration::from_millis(10))
            .backoff_cap(Duration::from_millis(100))
            .rate_limit(RateLimit {
                max_requests: 100,
                window: Duration::from_secs(1),
            })
            .build()
    }

    fn request() -> FetchRequest {
        FetchRequest::new("http://remote/data.json".to_string(), Vec::new(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_after_exactly_max_attempts() {
        let transport = Arc::new(ScriptedTransport::always(503));
        let fetcher = Fetcher::new(transport.clone(), &config(3));

        let err = fetcher.fetch(&request()).await.unwrap_err();
        match err {
            FetchError::ExhaustedRetries { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Transient { .. }));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_is_never_retried() {
        let transport = Arc::new(ScriptedTransport::always(400));
        let fetcher = Fetcher::new(transport.clone(), &config(5));

        let err = fetcher.fetch(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RejectedRequest { status: 400, .. }
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_recovers() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                Err(TransportError::Connection("reset by peer".to_string())),
                Err(TransportError::Timeout),
            ],
            200,
        ));
        let fetcher = Fetcher::new(transport.clone(), &config(4));

        let page = fetcher.fetch(&request()).await.unwrap();
        assert_eq!(page.payload, json!([]));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_response_counts_as_transient() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Ok(TransportReply {
                status: 429,
                body: serde_json::Value::Null,
            })],
            200,
        ));
        let fetcher = Fetcher::new(transport.clone(), &config(2));

        fetcher.fetch(&request()).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }
}
