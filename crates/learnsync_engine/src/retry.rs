//! Retry with exponential backoff, and error classification.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use std::future::Future;
use tracing::debug;

/// Message fragments that mark a failure as transient.
const RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnreset",
    "econnrefused",
    "fetch failed",
    "rate limit",
    "too many requests",
    "unavailable",
    "bad gateway",
];

/// Message fragments that mark a failure as permanent.
const PERMANENT_PATTERNS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "validation",
    "invalid",
    "not allowed",
];

/// How a failure should be treated by the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout, rate limit or 5xx failure.
    Retryable,
    /// Authorization or validation failure; retrying cannot help.
    Permanent,
    /// Not recognised. Treated as retryable.
    Unknown,
}

/// Classifies a failure by its message.
///
/// Matching is case-insensitive. Retryable signals win over permanent ones,
/// and HTTP status codes embedded in the message are honoured (429 and
/// 5xx retryable; 400, 401, 403 and 422 permanent).
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    let statuses: Vec<u16> = status_codes(&lower).collect();

    if RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
        || statuses.iter().any(|s| *s == 429 || (500..600).contains(s))
    {
        return ErrorClass::Retryable;
    }

    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p))
        || statuses.iter().any(|s| matches!(s, 400 | 401 | 403 | 422))
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Returns false only for failures classified as permanent.
pub fn is_retryable_error(message: &str) -> bool {
    classify_error(message) != ErrorClass::Permanent
}

/// Three-digit tokens that look like HTTP status codes.
fn status_codes(message: &str) -> impl Iterator<Item = u16> + '_ {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|token| token.parse().ok())
        .filter(|code| (100..600).contains(code))
}

/// Result of [`retry_with_backoff`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result: the first success or the last error.
    pub result: SyncResult<T>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Returns true if an attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `operation` up to `config.max_retries + 1` times.
///
/// Between attempts the task sleeps for [`RetryConfig::delay_for_attempt`].
/// A failure for which `should_retry` returns false ends the loop at once,
/// and there is no wait after the final attempt. `operation` receives the
/// 0-indexed attempt number.
pub async fn retry_with_backoff<T, F, Fut, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
    P: Fn(&SyncError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            Err(err) => {
                if attempt >= config.max_retries || !should_retry(&err) {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt + 1,
                    };
                }

                let delay = config.delay_for_attempt(attempt);
                debug!(attempt, ?delay, error = %err, "attempt failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
