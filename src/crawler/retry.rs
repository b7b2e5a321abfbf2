//! Bounded retry for transient fetch failures
//!
//! Every in-flight request carries a [`RetryBudget`] initialized from the
//! book's retry budget. A transient failure with attempts remaining re-issues
//! the identical request; anything else is handed back to the caller. Retries
//! go through the same per-host limiter as fresh requests and add no backoff of
//! their own, so a chapter of `n` pages costs at most `(budget + 1) * n`
//! requests.

use crate::crawler::fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use tokio_util::sync::CancellationToken;

/// Remaining re-issues allowed for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

/// What to do with a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the identical request
    Retry { remaining: u32 },
    /// Give up and surface the error
    GiveUp { reason: &'static str },
}

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self { remaining: retries }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Consumes one retry if the failure is worth retrying
    pub fn on_failure(&mut self, error: &FetchError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::GiveUp {
                reason: "permanent failure",
            };
        }

        if self.remaining == 0 {
            return RetryDecision::GiveUp {
                reason: "retry budget exhausted",
            };
        }

        self.remaining -= 1;
        RetryDecision::Retry {
            remaining: self.remaining,
        }
    }
}

/// Issues `request`, re-issuing it on transient failures until the budget runs out
///
/// Cancellation is checked before every attempt and raced against the request
/// itself; a cancelled request yields [`FetchError::Cancelled`].
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    retries: u32,
    cancel: &CancellationToken,
) -> Result<FetchResponse, FetchError> {
    let mut budget = RetryBudget::new(retries);
    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(request));
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(request)),
            result = fetcher.request(request) => result,
        };

        let error = match result {
            Ok(response) => {
                if attempt > 1 {
                    tracing::debug!("{} succeeded on attempt {}", request.url, attempt);
                }
                return Ok(response);
            }
            Err(error) => error,
        };

        match budget.on_failure(&error) {
            RetryDecision::Retry { remaining } => {
                tracing::warn!(
                    "Attempt {} for {} failed ({}), retrying ({} left)",
                    attempt,
                    request.url,
                    error,
                    remaining
                );
                attempt += 1;
            }
            RetryDecision::GiveUp { reason } => {
                tracing::debug!(
                    "Giving up on {} after {} attempt(s): {}",
                    request.url,
                    attempt,
                    reason
                );
                return Err(error);
            }
        }
    }
}

fn cancelled(request: &FetchRequest) -> FetchError {
    FetchError::Cancelled {
        url: request.url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::limiter::HostLimit;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use url::Url;

    /// Fails with the given status `failures` times, then succeeds
    struct FlakyFetcher {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl FlakyFetcher {
        fn new(failures: u32, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn request(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(FetchError::Status {
                    url: request.url.to_string(),
                    status: self.status,
                });
            }
            Ok(FetchResponse {
                url: request.url.clone(),
                status: 200,
                headers: HeaderMap::new(),
                body: b"ok".to_vec(),
            })
        }
    }

    fn request() -> FetchRequest {
        FetchRequest::get(
            Url::parse("https://example.com/c/1").unwrap(),
            Arc::new(HashMap::new()),
            HostLimit::default(),
        )
    }

    #[test]
    fn test_budget_decrements_until_exhausted() {
        let error = FetchError::Status {
            url: "https://example.com/".to_string(),
            status: 502,
        };
        let mut budget = RetryBudget::new(2);

        assert_eq!(
            budget.on_failure(&error),
            RetryDecision::Retry { remaining: 1 }
        );
        assert_eq!(
            budget.on_failure(&error),
            RetryDecision::Retry { remaining: 0 }
        );
        assert!(matches!(
            budget.on_failure(&error),
            RetryDecision::GiveUp { .. }
        ));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_permanent_failure_keeps_budget() {
        let error = FetchError::Status {
            url: "https://example.com/".to_string(),
            status: 404,
        };
        let mut budget = RetryBudget::new(3);

        assert!(matches!(
            budget.on_failure(&error),
            RetryDecision::GiveUp { .. }
        ));
        assert_eq!(budget.remaining(), 3);
    }

    #[tokio::test]
    async fn test_always_failing_request_is_attempted_budget_plus_one_times() {
        let fetcher = FlakyFetcher::new(u32::MAX, 503);
        let token = CancellationToken::new();

        let result = fetch_with_retry(&fetcher, &request(), 3, &token).await;

        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_budget_attempts_once() {
        let fetcher = FlakyFetcher::new(u32::MAX, 500);
        let token = CancellationToken::new();

        assert!(fetch_with_retry(&fetcher, &request(), 0, &token)
            .await
            .is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let fetcher = FlakyFetcher::new(2, 500);
        let token = CancellationToken::new();

        let response = fetch_with_retry(&fetcher, &request(), 2, &token)
            .await
            .unwrap();

        assert_eq!(response.text(), "ok");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let fetcher = FlakyFetcher::new(u32::MAX, 404);
        let token = CancellationToken::new();

        assert!(fetch_with_retry(&fetcher, &request(), 5, &token)
            .await
            .is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_issues_no_request() {
        let fetcher = FlakyFetcher::new(0, 200);
        let token = CancellationToken::new();
        token.cancel();

        let result = fetch_with_retry(&fetcher, &request(), 3, &token).await;

        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
