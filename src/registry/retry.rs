//! Registry request retry logic with exponential backoff.
//!
//! Handles transient failures like 5xx errors, rate limits (429), and
//! connection issues. A `Retry-After` header sent by the registry replaces
//! the computed backoff.

use std::{future::Future, time::Duration};

use reqwest::{StatusCode, header::RETRY_AFTER};
use tracing::{debug, warn};

use crate::{config::RetryConfig, observability::metrics};

/// Determines if a reqwest error is retryable.
///
/// Connection errors, timeouts, and other transient issues are retryable.
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect()
        || error.is_timeout()
        || error.is_request()
        || error
            .status()
            .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            .unwrap_or(false)
}

/// Delay requested by a `Retry-After` header in delta-seconds form.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let seconds = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    seconds.trim().parse().ok().map(Duration::from_secs)
}

/// Execute a registry request with retry logic.
///
/// `make_request` is called once per attempt. A response with a retryable
/// status is retried; the final response is returned whatever its status.
/// When the registry asks for a longer wait than `max_delay_ms`, the response
/// is returned without another attempt.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    operation: &str,
    make_request: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    if !config.enabled {
        return make_request().await;
    }

    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        let last_attempt = attempt + 1 >= max_attempts;

        match make_request().await {
            Ok(response) => {
                let status = response.status();

                if config.should_retry_status(status.as_u16()) && !last_attempt {
                    let delay = match retry_after(&response) {
                        Some(requested) if requested > config.max_delay() => {
                            warn!(
                                operation = operation,
                                status = %status,
                                retry_after_secs = requested.as_secs(),
                                "Registry asked for a longer wait than allowed, giving up"
                            );
                            return Ok(response);
                        }
                        Some(requested) => requested,
                        None => config.delay_for_attempt(attempt),
                    };
                    warn!(
                        operation = operation,
                        status = %status,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        "Retryable status code, will retry after delay"
                    );
                    metrics::record_registry_retry(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    debug!(
                        operation = operation,
                        status = %status,
                        attempt = attempt + 1,
                        "Request succeeded after retry"
                    );
                }

                return Ok(response);
            }
            Err(error) => {
                if is_retryable_error(&error) && !last_attempt {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        operation = operation,
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        "Retryable error, will retry after delay"
                    );
                    metrics::record_registry_retry(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    warn!(
                        operation = operation,
                        error = %error,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts"
                    );
                }

                return Err(error);
            }
        }
    }
}
