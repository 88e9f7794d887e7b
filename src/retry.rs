//! Policy-driven retries with exponential backoff and jitter.
//!
//! [`retry`] re-executes a fallible async operation under a [`RetryPolicy`]:
//! attempts are strictly sequential, cancellation always wins, and a
//! server-directed wait (a 429's `Retry-After`) can lengthen but never
//! shorten the computed backoff. If every attempt fails the caller gets
//! [`Error::RetryExhausted`] wrapping the final underlying error.

use crate::{
    cancel::{cancelled_opt, CancellationToken},
    Error, ErrorKind, Result,
};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Side-effect hook invoked before each retry sleep.
///
/// Receives the error that triggered the retry, the attempt number that just
/// failed (1-indexed), and the delay about to be slept. Used for
/// cross-cutting concerns like refreshing an expired token.
pub type OnRetry = Arc<dyn Fn(&Error, u32, Duration) + Send + Sync>;

/// When and how to re-execute a failed operation.
///
/// # Examples
///
/// ```
/// use seawall::RetryPolicy;
/// use std::time::Duration;
///
/// // 100ms, 200ms, 400ms... capped at 10s, with jitter.
/// let policy = RetryPolicy::new(3)
///     .with_initial_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_secs(10))
///     .with_jitter(true);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the computed backoff.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Whether to randomize delays (recommended; prevents retry storms).
    pub jitter: bool,
    /// Status codes the default predicate retries on.
    pub retry_on_status: HashSet<u16>,
    /// Error kinds the default predicate retries on.
    pub retry_on_errors: HashSet<ErrorKind>,
    /// Caller-supplied predicate; takes precedence over the default rules.
    pub should_retry: Option<Arc<dyn RetryPredicate>>,
    /// Optional side-effect hook run before each retry sleep.
    pub on_retry: Option<OnRetry>,
    /// Optional cancellation token; firing aborts the loop and any pending
    /// sleep immediately.
    pub cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    /// Creates a policy with the given retry budget and default backoff
    /// (100ms initial, 10s cap, multiplier 2, jitter on), retrying on
    /// transient statuses (408, 429, 5xx) and transient error kinds
    /// (network, timeout).
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
            retry_on_status: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_on_errors: [ErrorKind::Network, ErrorKind::Timeout]
                .into_iter()
                .collect(),
            should_retry: None,
            on_retry: None,
            cancel: None,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the set of retryable status codes.
    pub fn with_retry_on_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status = codes.into_iter().collect();
        self
    }

    /// Replaces the set of retryable error kinds.
    pub fn with_retry_on_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on_errors = kinds.into_iter().collect();
        self
    }

    /// Installs a custom predicate, overriding the status/kind sets.
    pub fn with_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    /// Installs a side-effect hook run before each retry sleep.
    pub fn with_on_retry(mut self, hook: OnRetry) -> Self {
        self.on_retry = Some(hook);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether `error` should be retried after `attempt` failures.
    ///
    /// A caller-supplied predicate takes precedence; otherwise the error
    /// matches if its status is in `retry_on_status` or its kind is in
    /// `retry_on_errors`.
    fn wants_retry(&self, error: &Error, attempt: u32) -> bool {
        if let Some(predicate) = &self.should_retry {
            return predicate.should_retry(error, attempt);
        }
        if let Some(status) = error.status() {
            if self.retry_on_status.contains(&status.as_u16()) {
                return true;
            }
        }
        self.retry_on_errors.contains(&error.kind())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("retry_on_status", &self.retry_on_status)
            .field("custom_predicate", &self.should_retry.is_some())
            .finish()
    }
}

/// A successful retry outcome.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The operation's result.
    pub data: T,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Wall time across all attempts and sleeps.
    pub total_time: Duration,
}

/// Computes the backoff delay before the retry that follows `attempt`.
///
/// Without jitter this is exactly
/// `min(initial_delay * multiplier^(attempt - 1), max_delay)`. With jitter
/// the result is scaled by a uniform factor in `[0.5, 1.5)` and floored to
/// whole milliseconds, still clamped to `max_delay`.
pub fn calculate_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base_ms =
        policy.initial_delay.as_millis() as f64 * policy.backoff_multiplier.powi(exponent);
    let capped_ms = base_ms.min(policy.max_delay.as_millis() as f64);

    let delay_ms = if policy.jitter {
        let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
        (capped_ms * factor).min(policy.max_delay.as_millis() as f64)
    } else {
        capped_ms
    };

    Duration::from_millis(delay_ms.floor() as u64)
}

/// Re-executes `operation` under `policy` until it succeeds, the policy
/// declines, the budget runs out, or cancellation fires.
///
/// Attempt numbering is 1-indexed; `max_retries = 2` means at most 3
/// attempts. Cancellation is checked before every attempt and interrupts
/// the backoff sleep; a cancellation error from the operation itself is
/// re-raised without consulting the policy.
///
/// # Examples
///
/// ```
/// use seawall::{retry, RetryPolicy};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), seawall::Error> {
/// let policy = RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1));
/// let outcome = retry(&policy, || async { Ok::<_, seawall::Error>(42) }).await?;
/// assert_eq!(outcome.data, 42);
/// assert_eq!(outcome.attempts, 1);
/// # Ok(())
/// # }
/// ```
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        if let Some(token) = &policy.cancel {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        match operation().await {
            Ok(data) => {
                return Ok(RetryOutcome {
                    data,
                    attempts: attempt,
                    total_time: start.elapsed(),
                });
            }
            Err(error) => {
                if error.is_cancellation() {
                    return Err(error);
                }

                tracing::warn!(
                    error = %error,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    "Attempt failed"
                );

                if attempt == max_attempts || !policy.wants_retry(&error, attempt) {
                    return Err(Error::RetryExhausted {
                        attempts: max_attempts,
                        last_error: Box::new(error),
                    });
                }

                let computed = calculate_delay(attempt, policy);
                // Server guidance lengthens the wait but never shortens it.
                let delay = match error.retry_after() {
                    Some(server_delay) => server_delay.max(computed),
                    None => computed,
                };

                if let Some(hook) = &policy.on_retry {
                    hook(&error, attempt, delay);
                }

                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = attempt,
                    "Retrying after delay"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled_opt(policy.cancel.as_ref()) => {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }
}

/// Determines whether a failed operation should be retried.
///
/// # Examples
///
/// ```
/// use seawall::{Error, RetryPredicate};
///
/// struct RetryOnConflict;
///
/// impl RetryPredicate for RetryOnConflict {
///     fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
///         error.status().map(|s| s.as_u16() == 409).unwrap_or(false)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `true` if the operation should be retried after this error.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    fn should_retry(&self, error: &Error, attempt: u32) -> bool;
}

/// Retries when the error's status code is in the given set.
#[derive(Debug, Clone)]
pub struct RetryOnStatusCodes(pub HashSet<u16>);

impl RetryOnStatusCodes {
    /// Builds the predicate from any collection of status codes.
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self(codes.into_iter().collect())
    }
}

impl RetryPredicate for RetryOnStatusCodes {
    fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
        error
            .status()
            .map(|status| self.0.contains(&status.as_u16()))
            .unwrap_or(false)
    }
}

/// Retries when the error's kind is in the given set.
#[derive(Debug, Clone)]
pub struct RetryOnErrorKinds(pub HashSet<ErrorKind>);

impl RetryOnErrorKinds {
    /// Builds the predicate from any collection of kinds.
    pub fn new(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self(kinds.into_iter().collect())
    }
}

impl RetryPredicate for RetryOnErrorKinds {
    fn should_retry(&self, error: &Error, _attempt: u32) -> bool {
        self.0.contains(&error.kind())
    }
}

/// Combines predicates with OR logic: retries if any member would.
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    /// Creates the combinator from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Forces `false` once `attempt >= limit`, regardless of the wrapped
/// predicate's own answer.
pub struct MaxAttempts<P> {
    inner: P,
    limit: u32,
}

impl<P> MaxAttempts<P> {
    /// Wraps `inner`, cutting it off at `limit` attempts.
    pub fn new(inner: P, limit: u32) -> Self {
        Self { inner, limit }
    }
}

impl<P: RetryPredicate> RetryPredicate for MaxAttempts<P> {
    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        attempt < self.limit && self.inner.should_retry(error, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flat_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    fn server_error() -> Error {
        Error::Http {
            status: http::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
            headers: Box::new(http::HeaderMap::new()),
            details: Default::default(),
        }
    }

    #[test]
    fn backoff_table_without_jitter() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(calculate_delay(1, &policy), Duration::from_millis(100));
        assert_eq!(calculate_delay(2, &policy), Duration::from_millis(200));
        assert_eq!(calculate_delay(3, &policy), Duration::from_millis(400));
        assert_eq!(calculate_delay(4, &policy), Duration::from_millis(800));
        // Capped by max_delay.
        assert_eq!(calculate_delay(10, &policy), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(3)
            .with_initial_delay(Duration::from_millis(1000))
            .with_jitter(true);
        for _ in 0..200 {
            let delay = calculate_delay(1, &policy);
            assert!(delay >= Duration::from_millis(500), "got {delay:?}");
            assert!(delay < Duration::from_millis(1500), "got {delay:?}");
        }
    }

    #[tokio::test]
    async fn exhaustion_counts_every_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry(&flat_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(server_error()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetryExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.kind(), ErrorKind::Http);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn succeeds_mid_budget() {
        let calls = AtomicU32::new(0);
        let outcome = retry(&flat_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.data, "done");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry(&flat_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Configuration("bad".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::RetryExhausted { .. })));
    }

    #[tokio::test]
    async fn custom_predicate_takes_precedence() {
        struct Never;
        impl RetryPredicate for Never {
            fn should_retry(&self, _: &Error, _: u32) -> bool {
                false
            }
        }

        let calls = AtomicU32::new(0);
        let policy = flat_policy(5).with_predicate(Arc::new(Never));
        let _ = retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(server_error()) }
        })
        .await;

        // Retryable by status, but the predicate said no.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_directed_wait_dominates_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1)
            .with_initial_delay(Duration::from_millis(5))
            .with_jitter(false);

        let start = Instant::now();
        let _ = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::RateLimit {
                        message: "slow down".into(),
                        retry_after: Some(Duration::from_millis(200)),
                        details: Default::default(),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(2)
            .with_initial_delay(Duration::from_secs(5))
            .with_jitter(false)
            .with_cancel(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = retry(&policy, || async { Err::<(), _>(server_error()) }).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "sleep was not interrupted"
        );
    }

    #[tokio::test]
    async fn cancellation_error_is_reraised_unconsulted() {
        let calls = AtomicU32::new(0);
        let result = retry(&flat_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Cancelled) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn on_retry_hook_sees_each_failure() {
        let seen = Arc::new(AtomicU32::new(0));
        let hook_seen = seen.clone();
        let policy = flat_policy(2).with_on_retry(Arc::new(move |_, attempt, _| {
            hook_seen.store(attempt, Ordering::SeqCst);
        }));

        let _ = retry(&policy, || async { Err::<(), _>(server_error()) }).await;
        // Hook runs before each sleep; the last failed-then-retried attempt is 2.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn predicate_combinators() {
        let on_503 = RetryOnStatusCodes::new([503]);
        let on_network = RetryOnErrorKinds::new([ErrorKind::Network]);
        let either = OrPredicate::new(vec![
            Box::new(on_503.clone()),
            Box::new(on_network.clone()),
        ]);

        let network = Error::Network {
            message: "down".into(),
            source: None,
        };
        assert!(!on_503.should_retry(&network, 1));
        assert!(on_network.should_retry(&network, 1));
        assert!(either.should_retry(&network, 1));

        let capped = MaxAttempts::new(either, 3);
        assert!(capped.should_retry(&network, 2));
        assert!(!capped.should_retry(&network, 3));
    }
}
