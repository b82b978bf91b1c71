//! Error taxonomy for the retrieval and generation pipeline.
//!
//! Retrieval-stage failures are caught by the engine and degrade the turn to
//! "no context"; only validation and generation failures reach the caller.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or oversized input, rejected before any external call.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Query embedding does not match the store's configured dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Rate limiting, timeouts, 5xx-class provider failures. Retryable.
    #[error("transient provider failure: {message}")]
    ProviderTransient { message: String },

    /// Authentication or request validation failures from a provider. Not retried.
    #[error("provider error: {message}")]
    ProviderFatal { message: String },

    /// A write to the conversation store failed. Logged, never fails a turn.
    #[error("persistence failure: {message}")]
    Persistence { message: String },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderTransient { .. })
    }

    /// Map an HTTP status from an external provider onto the taxonomy.
    /// 408/429 and 5xx are transient; everything else client-side is fatal.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate_body(body));
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            Error::ProviderTransient { message }
        } else {
            Error::ProviderFatal { message }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::ProviderTransient {
                message: e.to_string(),
            }
        } else {
            Error::ProviderFatal {
                message: e.to_string(),
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(300).collect()
}

/// Retry an idempotent async operation with exponential backoff.
/// Only transient failures are retried; fatal errors surface immediately.
pub async fn with_retries<T, F, Fut>(max_attempts: u32, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = Duration::from_millis(250 * 2u64.pow(attempt - 1));
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "{} failed transiently, retrying",
                    op_name
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::ProviderTransient {
                        message: "rate limited".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(3, "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::ProviderFatal {
                    message: "bad api key".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_classification() {
        let transient = Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(transient.is_transient());
        let transient = Error::from_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(transient.is_transient());
        let fatal = Error::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!fatal.is_transient());
    }
}
