//! Retry policies and the decorator that applies one to a [`Transport`].
//!
//! The client composes two [`RetryPolicy`] instances: [`RetryPolicy::transport`] wraps
//! every HTTP exchange through [`Retrying`], and [`RetryPolicy::application`] wraps the
//! whole logical call (transport layer and response decoding included).

use super::rest::Error;
use super::transport::{HttpReply, HttpRequest, Transport};
use async_trait::async_trait;
use derive_new::new;
use derive_setters::Setters;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound applied to a server-provided `Retry-After`.
pub const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

/// Statuses worth replaying: rate limiting and transient server faults.
pub const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base`, `2 * base`, `4 * base`, ...
    Exponential { base: Duration },
    /// `unit`, `2 * unit`, `3 * unit`, ...
    Linear { unit: Duration },
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
            Backoff::Linear { unit } => unit.saturating_mul(attempt),
        }
    }
}

/// How many times to try, how long to wait in between, and which errors qualify.
#[derive(Clone, Copy, new, Setters)]
#[setters(prefix = "with_")]
pub struct RetryPolicy {
    /// Layer name attached to every log event.
    #[setters(skip)]
    pub name: &'static str,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: fn(&Error) -> bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// 5 attempts, exponential backoff from 1s, on 429/500/502/503/504 and network faults.
    pub fn transport() -> Self {
        Self::new(
            "transport",
            5,
            Backoff::Exponential {
                base: Duration::from_secs(1),
            },
            is_transport_retryable,
        )
    }

    /// 3 attempts, linear backoff in 5s steps, on 503 bursts and network faults.
    pub fn application() -> Self {
        Self::new(
            "application",
            3,
            Backoff::Linear {
                unit: Duration::from_secs(5),
            },
            is_application_retryable,
        )
    }

    /// A policy that makes exactly one attempt.
    pub fn none(name: &'static str) -> Self {
        Self::new(name, 1, Backoff::Linear { unit: Duration::ZERO }, |_| false)
    }

    /// Wait before the next attempt. A `Retry-After` on 429/503 overrides the backoff.
    pub fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
        match error.root_cause() {
            Error::Status {
                status,
                retry_after: Some(after),
                ..
            } if *status == StatusCode::TOO_MANY_REQUESTS
                || *status == StatusCode::SERVICE_UNAVAILABLE =>
            {
                (*after).min(RETRY_AFTER_CAP)
            }
            _ => self.backoff.delay(attempt),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Exhaustion yields [`Error::ExhaustedRetries`].
    pub async fn run<F, Fut, T>(&self, sleeper: &dyn Sleeper, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(layer = self.name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !(self.retryable)(&error) {
                debug!(layer = self.name, attempt, %error, "non-retryable error");
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    layer = self.name,
                    attempts = attempt,
                    status = error.status().map(|s| s.as_u16()),
                    %error,
                    "retry budget exhausted"
                );
                return Err(Error::ExhaustedRetries {
                    layer: self.name,
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let wait = self.delay_for(attempt, &error);
            warn!(
                layer = self.name,
                attempt,
                max_attempts,
                status = error.status().map(|s| s.as_u16()),
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                %error,
                "attempt failed, backing off"
            );
            sleeper.sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Retryable at the HTTP layer: the listed statuses and transient network faults.
pub fn is_transport_retryable(error: &Error) -> bool {
    match error {
        Error::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
        Error::Transport(e) => is_transient(e),
        _ => false,
    }
}

/// Retryable around the whole call: 503, even after the transport layer gave up on
/// it, and transient network faults. 429 is left to the transport layer.
pub fn is_application_retryable(error: &Error) -> bool {
    match error {
        Error::ExhaustedRetries { last, .. } => is_application_retryable(last),
        Error::Status { status, .. } => *status == StatusCode::SERVICE_UNAVAILABLE,
        Error::Transport(e) => is_transient(e),
        _ => false,
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Source of the waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Applies a [`RetryPolicy`] to every request that is marked idempotent.
#[derive(Clone, new)]
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

#[async_trait]
impl<T: Transport> Transport for Retrying<T> {
    async fn send(&self, request: &HttpRequest) -> Result<HttpReply, Error> {
        if !request.idempotent {
            return self.inner.send(request).await;
        }
        self.policy
            .run(self.sleeper.as_ref(), || self.inner.send(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for Recorder {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn status(code: u16) -> Error {
        Error::Status {
            status: StatusCode::from_u16(code).unwrap(),
            retry_after: None,
            body: String::new(),
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
        };
        let delays: Vec<_> = (1..=4).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn linear_backoff_is_proportional_to_attempt() {
        let backoff = Backoff::Linear {
            unit: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(backoff.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn transport_layer_classification() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_transport_retryable(&status(code)), "{code}");
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!is_transport_retryable(&status(code)), "{code}");
        }
        assert!(!is_transport_retryable(&Error::MissingCredential));
        assert!(!is_transport_retryable(&Error::NoContent));
    }

    #[test]
    fn application_layer_retries_only_unavailable() {
        assert!(is_application_retryable(&status(503)));
        assert!(!is_application_retryable(&status(429)));
        assert!(!is_application_retryable(&status(500)));

        let exhausted = Error::ExhaustedRetries {
            layer: "transport",
            attempts: 5,
            last: Box::new(status(503)),
        };
        assert!(is_application_retryable(&exhausted));

        let exhausted = Error::ExhaustedRetries {
            layer: "transport",
            attempts: 5,
            last: Box::new(status(502)),
        };
        assert!(!is_application_retryable(&exhausted));
    }

    #[test]
    fn retry_after_overrides_backoff_up_to_cap() {
        let policy = RetryPolicy::transport();
        let limited = Error::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(Duration::from_secs(3)),
            body: String::new(),
        };
        assert_eq!(policy.delay_for(1, &limited), Duration::from_secs(3));

        let limited = Error::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(Duration::from_secs(3600)),
            body: String::new(),
        };
        assert_eq!(policy.delay_for(1, &limited), RETRY_AFTER_CAP);

        assert_eq!(policy.delay_for(3, &status(500)), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let recorder = Recorder::default();
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::transport();

        let result = policy
            .run(&recorder, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(status(503))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn run_stops_on_non_retryable() {
        let recorder = Recorder::default();
        let calls = &AtomicUsize::new(0);

        let result: Result<(), _> = RetryPolicy::transport()
            .run(&recorder, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(status(404))
            })
            .await;

        assert!(matches!(result, Err(Error::Status { status, .. }) if status == StatusCode::NOT_FOUND));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_exhausts_budget() {
        let recorder = Recorder::default();
        let calls = &AtomicUsize::new(0);

        let result: Result<(), _> = RetryPolicy::application()
            .run(&recorder, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(status(503))
            })
            .await;

        match result {
            Err(Error::ExhaustedRetries {
                layer, attempts, ..
            }) => {
                assert_eq!(layer, "application");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn single_attempt_policy_never_waits() {
        let recorder = Recorder::default();
        let result: Result<(), _> = RetryPolicy::none("once")
            .run(&recorder, || async { Err(status(503)) })
            .await;

        assert!(matches!(result, Err(Error::Status { .. })));
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
