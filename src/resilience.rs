// Resilience helpers shared by the provider layer and the orchestrator.
//
// `is_transient` classifies an error as worth retrying; `retry_transient`
// wraps a fallible async operation in a bounded, jittered backoff loop;
// `with_first_token_timeout` bounds how long a caller waits for the first
// item out of a stream before giving up.

use crate::atoms::constants::{MAX_RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use crate::atoms::error::HiveError;
use crate::provider::TokenStream;
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;

/// True if an HTTP status code is worth retrying (server overload, rate
/// limiting, or a gateway hiccup).
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// True if a `reqwest::Error` represents a transient network condition
/// (connection reset, DNS failure, or a client-side timeout) rather than a
/// malformed request or an auth failure.
pub fn is_transient_reqwest_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    if let Some(status) = err.status() {
        return is_retryable_status(status.as_u16());
    }
    // A request-level error with no status at all (connection reset mid
    // response, DNS resolution failure) is presumed transient.
    err.is_request()
}

/// True if a `HiveError` wraps a condition worth retrying.
pub fn is_transient(err: &HiveError) -> bool {
    match err {
        HiveError::ProviderTransient { .. } => true,
        HiveError::Timeout(_) => true,
        HiveError::Http(e) => is_transient_reqwest_error(e),
        _ => false,
    }
}

/// Deterministic-enough jitter without pulling in a `rand` dependency: the
/// low bits of the current time's subsecond nanoseconds give a cheap,
/// adequately-distributed source for a backoff loop that only needs to
/// avoid thundering-herd retries, not cryptographic randomness.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Exponential backoff with jitter, honoring an optional `Retry-After`
/// value in seconds when the caller has one.
pub fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs);
    }
    let base = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = base.min(RETRY_MAX_DELAY_MS);
    let jitter = (capped as f64 * 0.25 * (jitter_fraction() * 2.0 - 1.0)) as i64;
    let with_jitter = (capped as i64 + jitter).max(0) as u64;
    Duration::from_millis(with_jitter)
}

/// Retry `op` up to `MAX_RETRY_ATTEMPTS` additional times when it returns a
/// transient error, sleeping a jittered backoff between attempts. Non-transient
/// errors are returned immediately without retrying.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T, HiveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HiveError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < MAX_RETRY_ATTEMPTS => {
                tokio::time::sleep(retry_delay(attempt, None)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wrap a token stream so that if no token arrives within `duration` of the
/// first poll, the underlying stream is dropped (cancelling its in-flight
/// read) and a single `Timeout` item is yielded in its place. Tokens after
/// the first are passed through unchanged and unbounded — only the
/// time-to-first-token is bounded, per §4.C.
pub fn with_first_token_timeout(duration: Duration, mut stream: TokenStream) -> TokenStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, HiveError>>(32);
    tokio::spawn(async move {
        match tokio::time::timeout(duration, stream.next()).await {
            Ok(Some(item)) => {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(_) => {
                let _ = tx.send(Err(HiveError::Timeout("first token".to_string()))).await;
                return;
            }
        }
        while let Some(item) = stream.next().await {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_spec_set() {
        for status in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(status));
        }
        for status in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(status));
        }
    }

    #[test]
    fn retry_delay_respects_retry_after() {
        let delay = retry_delay(0, Some(7));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn retry_delay_grows_with_attempt_and_stays_capped() {
        let first = retry_delay(0, None);
        let later = retry_delay(8, None);
        assert!(first.as_millis() <= RETRY_MAX_DELAY_MS as u128);
        assert!(later.as_millis() <= RETRY_MAX_DELAY_MS as u128);
        assert!(later.as_millis() >= (RETRY_MAX_DELAY_MS as f64 * 0.75) as u128);
    }

    #[tokio::test]
    async fn retry_transient_gives_up_on_non_transient_error() {
        let mut calls = 0;
        let result: Result<(), HiveError> = retry_transient(|| {
            calls += 1;
            async { Err(HiveError::InvalidInput("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_transient_retries_up_to_max_attempts() {
        let mut calls = 0;
        let result: Result<(), HiveError> = retry_transient(|| {
            calls += 1;
            async { Err(HiveError::provider_transient("test", "still down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, MAX_RETRY_ATTEMPTS as usize + 1);
    }

    #[tokio::test]
    async fn first_token_timeout_fires_when_stream_is_silent() {
        let slow: TokenStream = Box::pin(futures::stream::once(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }));
        let mut wrapped = with_first_token_timeout(Duration::from_millis(10), slow);
        let first = wrapped.next().await;
        assert!(matches!(first, Some(Err(HiveError::Timeout(_)))));
    }

    #[tokio::test]
    async fn first_token_timeout_passes_through_prompt_tokens() {
        let fast: TokenStream = Box::pin(tokio_stream::iter(vec![
            Ok("hello".to_string()),
            Ok(" world".to_string()),
        ]));
        let mut wrapped = with_first_token_timeout(Duration::from_secs(30), fast);
        assert_eq!(wrapped.next().await.unwrap().unwrap(), "hello");
        assert_eq!(wrapped.next().await.unwrap().unwrap(), " world");
        assert!(wrapped.next().await.is_none());
    }
}
