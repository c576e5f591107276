// ============================================================================
// Retrying Execution Strategy
// ============================================================================
//
//   READY ──execute──> RUNNING
//   RUNNING ──success──> DONE(success)
//   RUNNING ──transient execution fault──> BACKOFF ──> RUNNING
//   RUNNING ──commit fault──> VERIFYING
//   VERIFYING ──present──> DONE(success)
//   VERIFYING ──absent──> BACKOFF
//   RUNNING/BACKOFF ──budget exhausted──> DONE(RetryLimitExceeded)
//   RUNNING ──permanent fault──> DONE(failure)
//
// Every transient error, including those raised while verifying, is charged
// against one budget per invocation.
//
// ============================================================================

use super::cancel::CancellationToken;
use super::detector::{DefaultTransientErrorDetector, FaultKind, TransientErrorDetector};
use super::policy::RetryPolicy;
use crate::core::{DbError, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Outcome of a verification predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult<T> {
    /// The operation's effect is persisted; `T` is handed back to the caller.
    Succeeded(T),
    /// The operation's effect is absent; the operation must run again.
    NotSucceeded,
}

impl<T> ExecutionResult<T> {
    pub fn is_successful(&self) -> bool {
        matches!(self, ExecutionResult::Succeeded(_))
    }
}

/// Policy object that runs a unit of work and retries it on transient faults.
///
/// A strategy keeps no state between invocations, so one instance can be
/// shared by any number of concurrent callers working on independent units
/// of work.
#[derive(Clone)]
pub struct ExecutionStrategy {
    policy: RetryPolicy,
    detector: Arc<dyn TransientErrorDetector>,
}

impl std::fmt::Debug for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStrategy")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::retrying(RetryPolicy::default())
    }
}

/// Errors and timing of one invocation.
struct RetryBudget {
    encountered: Vec<DbError>,
    started: Instant,
}

impl RetryBudget {
    fn start() -> Self {
        Self {
            encountered: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl ExecutionStrategy {
    pub fn new(policy: RetryPolicy, detector: Arc<dyn TransientErrorDetector>) -> Self {
        Self { policy, detector }
    }

    /// Retrying strategy with the default transient error detector.
    ///
    /// `policy` is taken as is. With a zero delay coefficient every retry is
    /// immediate, so pair it with a small `max_retry_count` or use
    /// [`try_retrying`](Self::try_retrying).
    pub fn retrying(policy: RetryPolicy) -> Self {
        Self::new(policy, Arc::new(DefaultTransientErrorDetector::new()))
    }

    /// Like [`retrying`](Self::retrying), rejecting policies that fail
    /// [`RetryPolicy::validate`].
    pub fn try_retrying(policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self::retrying(policy))
    }

    /// Strategy that runs every operation exactly once.
    pub fn non_retrying() -> Self {
        Self::retrying(RetryPolicy::none())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn retries_on_failure(&self) -> bool {
        self.policy.retries_on_failure()
    }

    /// Run `operation`, retrying it from scratch on transient faults.
    ///
    /// Commit faults are treated like execution faults because there is no
    /// way to tell whether the commit took effect; use
    /// [`execute_with_verification`](Self::execute_with_verification) when
    /// the operation is not idempotent.
    pub async fn execute<S, T, Op>(
        &self,
        state: &mut S,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>> + Send,
    {
        self.run(
            state,
            operation,
            None::<fn(&mut S) -> BoxFuture<'_, Result<ExecutionResult<T>>>>,
            cancel,
        )
        .await
    }

    /// Run `operation`; when a commit fault leaves its outcome unknown, ask
    /// `verify_succeeded` whether the effect was persisted before deciding
    /// between success and a retry.
    ///
    /// `verify_succeeded` must not modify persisted state. Its own transient
    /// failures are retried and charged against the same budget.
    ///
    /// A commit fault is charged against the budget before verification
    /// runs. When that fault exhausts the budget the call fails with
    /// [`DbError::RetryLimitExceeded`] without verifying, even if the commit
    /// was in fact persisted.
    pub async fn execute_with_verification<S, T, Op, V>(
        &self,
        state: &mut S,
        operation: Op,
        verify_succeeded: V,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>> + Send,
        V: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<ExecutionResult<T>>> + Send,
    {
        self.run(state, operation, Some(verify_succeeded), cancel).await
    }

    async fn run<S, T, Op, V>(
        &self,
        state: &mut S,
        mut operation: Op,
        mut verify_succeeded: Option<V>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>> + Send,
        V: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<ExecutionResult<T>>> + Send,
    {
        cancel.check()?;

        if !self.retries_on_failure() {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DbError::Cancelled),
                result = operation(&mut *state) => result,
            };
        }

        let mut budget = RetryBudget::start();
        loop {
            debug!(attempt = budget.encountered.len() + 1, "executing operation");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DbError::Cancelled),
                result = operation(&mut *state) => result,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let kind = self.detector.classify(&err);
            if kind == FaultKind::Permanent {
                return Err(err);
            }

            let delay = self.next_delay(&mut budget, err)?;

            if kind == FaultKind::TransientCommit
                && let Some(verify) = verify_succeeded.as_mut()
            {
                match self.verify(state, verify, &mut budget, cancel).await? {
                    ExecutionResult::Succeeded(value) => {
                        debug!("commit verified after transient failure");
                        return Ok(value);
                    }
                    ExecutionResult::NotSucceeded => {
                        debug!("commit did not take effect; retrying operation");
                    }
                }
            }

            self.backoff(delay, cancel).await?;
        }
    }

    /// Run the verification predicate until it answers or the budget runs out.
    async fn verify<S, T, V>(
        &self,
        state: &mut S,
        verify_succeeded: &mut V,
        budget: &mut RetryBudget,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult<T>>
    where
        S: Send,
        T: Send,
        V: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<ExecutionResult<T>>> + Send,
    {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DbError::Cancelled),
                result = verify_succeeded(&mut *state) => result,
            };

            let err = match outcome {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !self.detector.classify(&err).is_transient() {
                return Err(err);
            }

            let delay = self.next_delay(budget, err)?;
            self.backoff(delay, cancel).await?;
        }
    }

    /// Charge `err` against the budget and return the delay before the next
    /// attempt, or the distinguished retry-limit error.
    fn next_delay(&self, budget: &mut RetryBudget, err: DbError) -> Result<Duration> {
        let retry_index = budget.encountered.len();
        let delay = self
            .policy
            .next_delay(retry_index, budget.started.elapsed());

        match delay {
            Some(delay) => {
                warn!(
                    retry = retry_index + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; the operation will be retried"
                );
                budget.encountered.push(err);
                Ok(delay)
            }
            None => {
                let attempts = retry_index + 1;
                error!(attempts, error = %err, "retry limit exceeded");
                Err(DbError::RetryLimitExceeded {
                    attempts,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn backoff(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        if delay.is_zero() {
            return cancel.check();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DbError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retry_count: usize) -> RetryPolicy {
        RetryPolicy::new(max_retry_count, Duration::from_secs(1))
            .with_delay_coefficient(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_runs_once() {
        let strategy = ExecutionStrategy::retrying(fast_policy(3));
        let mut calls = 0usize;

        let value = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Ok::<_, DbError>(42)
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let strategy = ExecutionStrategy::retrying(fast_policy(5));
        let mut calls = 0usize;

        let value = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        if *calls < 3 {
                            Err(DbError::ConnectionFailure("reset".into()))
                        } else {
                            Ok(*calls)
                        }
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let strategy = ExecutionStrategy::retrying(fast_policy(5));
        let mut calls = 0usize;

        let err = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Err::<(), _>(DbError::ConstraintViolation("duplicate".into()))
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_limit_counts_every_failure() {
        let strategy = ExecutionStrategy::retrying(fast_policy(2));
        let mut calls = 0usize;

        let err = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Err::<(), _>(DbError::Timeout("slow".into()))
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DbError::RetryLimitExceeded { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, DbError::Timeout(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_verification_success_stops_retrying() {
        let strategy = ExecutionStrategy::retrying(fast_policy(5));
        let verifications = AtomicUsize::new(0);
        let mut calls = 0usize;

        let value = strategy
            .execute_with_verification(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Err(DbError::CommitOutcomeUnknown("ack lost".into()))
                    })
                },
                |calls| {
                    verifications.fetch_add(1, Ordering::SeqCst);
                    let seen = *calls;
                    Box::pin(async move {
                        Ok::<_, DbError>(ExecutionResult::Succeeded(seen * 10))
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, 10);
        assert_eq!(calls, 1);
        assert_eq!(verifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execution_faults_skip_verification() {
        let strategy = ExecutionStrategy::retrying(fast_policy(5));
        let verifications = AtomicUsize::new(0);
        let mut calls = 0usize;

        strategy
            .execute_with_verification(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        if *calls == 1 {
                            return Err(DbError::ConnectionFailure("reset".into()));
                        }
                        Ok(())
                    })
                },
                |_| {
                    verifications.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move { Ok::<_, DbError>(ExecutionResult::NotSucceeded) })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(verifications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retrying_returns_original_error() {
        let strategy = ExecutionStrategy::non_retrying();
        assert!(!strategy.retries_on_failure());

        let mut calls = 0usize;
        let err = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Err::<(), _>(DbError::ConnectionFailure("reset".into()))
                    })
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::ConnectionFailure(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_try_retrying_rejects_zero_coefficient() {
        let unbounded = RetryPolicy::new(usize::MAX, Duration::from_millis(100))
            .with_delay_coefficient(Duration::ZERO);
        assert!(matches!(
            ExecutionStrategy::try_retrying(unbounded),
            Err(DbError::Configuration(_))
        ));

        let strategy = ExecutionStrategy::try_retrying(fast_policy(3)).unwrap();
        assert_eq!(strategy.policy().max_retry_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_any_attempt() {
        let strategy = ExecutionStrategy::retrying(fast_policy(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut calls = 0usize;
        let err = strategy
            .execute(
                &mut calls,
                |calls| {
                    Box::pin(async move {
                        *calls += 1;
                        Ok::<_, DbError>(())
                    })
                },
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Cancelled));
        assert_eq!(calls, 0);
    }
}
