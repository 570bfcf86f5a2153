use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vellum_core_types::TransactionHandle;
use vellum_session_pool::{PooledSession, SessionPool};

use crate::backoff::RetryPolicy;
use crate::context::TransactionContext;
use crate::error::TxnError;
use crate::executor::StatementExecutor;
use crate::metrics;
use crate::runner::exhausted;
use crate::state::{classify, is_retryable, Lifecycle, Step, TransactionState};

/// Suspending counterpart of [`crate::TransactionRunner`].
///
/// Suspends while acquiring a session, while statements and the commit are
/// in flight, and during backoff. The cancellation token is checked at each
/// of those points; a cancelled run rolls back the current attempt, releases
/// its session and returns [`TxnError::Cancelled`]. Dropping the future
/// instead releases the session through the lease guard.
pub struct AsyncTransactionRunner {
    pool: SessionPool,
    executor: Arc<dyn StatementExecutor>,
    policy: RetryPolicy,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
}

impl AsyncTransactionRunner {
    pub fn new(pool: SessionPool, executor: Arc<dyn StatementExecutor>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            executor,
            policy,
            lifecycle: Lifecycle::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TransactionState {
        self.lifecycle.state()
    }

    pub fn attempts(&self) -> u32 {
        self.lifecycle.attempts()
    }

    pub async fn run<T, F, Fut>(&mut self, work: F) -> Result<T, TxnError>
    where
        F: FnMut(TransactionContext) -> Fut,
        Fut: Future<Output = Result<T, TxnError>>,
    {
        self.lifecycle.begin()?;
        metrics::record_started();
        let acquired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            acquired = self.pool.acquire_async() => Some(acquired),
        };
        let mut session = match acquired {
            None => return Err(self.cancelled(None).await),
            Some(Err(err)) => {
                self.lifecycle.advance(TransactionState::Failed);
                metrics::record_failed();
                return Err(err.into());
            }
            Some(Ok(session)) => session,
        };
        let result = self.drive(&mut session, work).await;
        session.release();
        result
    }

    pub async fn run_with_session<T, F, Fut>(
        &mut self,
        session: &mut PooledSession,
        work: F,
    ) -> Result<T, TxnError>
    where
        F: FnMut(TransactionContext) -> Fut,
        Fut: Future<Output = Result<T, TxnError>>,
    {
        self.lifecycle.begin()?;
        metrics::record_started();
        self.drive(session, work).await
    }

    async fn drive<T, F, Fut>(
        &mut self,
        session: &mut PooledSession,
        mut work: F,
    ) -> Result<T, TxnError>
    where
        F: FnMut(TransactionContext) -> Fut,
        Fut: Future<Output = Result<T, TxnError>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(None).await);
            }
            let attempt = self.lifecycle.next_attempt();
            let handle = TransactionHandle::new(session.id().clone(), attempt);
            let ctx = TransactionContext::new(
                Arc::clone(&self.executor),
                handle.clone(),
                self.cancel.clone(),
            );
            let result = work(ctx.clone()).await;
            let outcome = ctx.finish();

            let status = match classify(result, outcome) {
                Step::Commit(value, mutations) => {
                    self.lifecycle.advance(TransactionState::Committing);
                    let committed = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        committed = self.executor.commit_async(&handle, &mutations) => Some(committed),
                    };
                    match committed {
                        None => return Err(self.cancelled(Some(&handle)).await),
                        Some(Ok(())) => {
                            self.lifecycle.advance(TransactionState::Done);
                            metrics::record_committed();
                            info!(
                                target: "txn",
                                session = %handle.session,
                                attempts = attempt,
                                mutations = mutations.len(),
                                "transaction committed"
                            );
                            return Ok(value);
                        }
                        Some(Err(status)) if is_retryable(&status) => status,
                        Some(Err(status)) => return Err(self.fail(&handle, status.into()).await),
                    }
                }
                Step::Retry(status) => status,
                Step::Fail(TxnError::Cancelled) => {
                    return Err(self.cancelled(Some(&handle)).await)
                }
                Step::Fail(err) => return Err(self.fail(&handle, err).await),
            };

            self.lifecycle.advance(TransactionState::Aborted);
            metrics::record_aborted();
            if !self.policy.allows(attempt) {
                return Err(exhausted(&mut self.lifecycle, &handle, status));
            }
            if status.is_session_not_found() {
                debug!(target: "txn", session = %handle.session, "renewing lost session");
                let renewed = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    renewed = session.renew_async() => Some(renewed),
                };
                match renewed {
                    None => return Err(self.cancelled(None).await),
                    Some(Err(err)) => {
                        self.lifecycle.advance(TransactionState::Failed);
                        metrics::record_failed();
                        return Err(err.into());
                    }
                    Some(Ok(())) => {}
                }
            }
            let delay = status
                .retry_delay()
                .unwrap_or_else(|| self.policy.delay_for(attempt));
            debug!(
                target: "txn",
                session = %handle.session,
                attempt,
                delay_ms = delay.as_millis() as u64,
                code = %status.code(),
                "retrying aborted transaction"
            );
            if !delay.is_zero() {
                let slept = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                };
                if !slept {
                    return Err(self.cancelled(None).await);
                }
            }
        }
    }

    async fn fail(&mut self, handle: &TransactionHandle, err: TxnError) -> TxnError {
        if let Err(rollback) = self.executor.rollback_async(handle).await {
            warn!(
                target: "txn",
                session = %handle.session,
                error = %rollback,
                "rollback after failed attempt did not succeed"
            );
        }
        self.lifecycle.advance(TransactionState::Failed);
        metrics::record_failed();
        err
    }

    /// Rolls back the in-flight attempt, if any, and ends the run.
    async fn cancelled(&mut self, in_flight: Option<&TransactionHandle>) -> TxnError {
        if let Some(handle) = in_flight {
            if let Err(rollback) = self.executor.rollback_async(handle).await {
                warn!(
                    target: "txn",
                    session = %handle.session,
                    error = %rollback,
                    "rollback of cancelled attempt did not succeed"
                );
            }
        }
        self.lifecycle.advance(TransactionState::Cancelled);
        metrics::record_cancelled();
        info!(
            target: "txn",
            attempts = self.lifecycle.attempts(),
            "transaction cancelled"
        );
        TxnError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use vellum_core_types::{Code, Mutation, Statement, StatementResult, Status};
    use vellum_session_pool::SessionPoolOptions;

    #[derive(Default)]
    struct Slow {
        latency: Duration,
        aborts_left: Mutex<u32>,
        rollbacks: Mutex<u32>,
        commits: Mutex<u32>,
    }

    #[async_trait]
    impl StatementExecutor for Slow {
        fn execute(
            &self,
            _statement: &Statement,
            _txn: &TransactionHandle,
        ) -> Result<StatementResult, Status> {
            let mut left = self.aborts_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(Status::aborted("Transaction was aborted"));
            }
            Ok(StatementResult::UpdateCount(1))
        }

        fn commit(&self, _txn: &TransactionHandle, _mutations: &[Mutation]) -> Result<(), Status> {
            *self.commits.lock() += 1;
            Ok(())
        }

        fn rollback(&self, _txn: &TransactionHandle) -> Result<(), Status> {
            *self.rollbacks.lock() += 1;
            Ok(())
        }

        async fn execute_async(
            &self,
            statement: &Statement,
            txn: &TransactionHandle,
        ) -> Result<StatementResult, Status> {
            tokio::time::sleep(self.latency).await;
            self.execute(statement, txn)
        }
    }

    fn pool() -> SessionPool {
        SessionPool::new(SessionPoolOptions {
            min_sessions: 0,
            max_sessions: 1,
            inc_step: 1,
            fail_on_session_leak: true,
            acquire_timeout: Duration::from_millis(200),
            close_grace_period: Duration::ZERO,
        })
        .unwrap()
    }

    fn update() -> Statement {
        Statement::new("UPDATE FOO SET BAR=1 WHERE BAZ=2")
    }

    #[tokio::test]
    async fn retries_abort_and_commits() {
        let pool = pool();
        let backend = Arc::new(Slow {
            aborts_left: Mutex::new(2),
            ..Slow::default()
        });
        let mut runner =
            AsyncTransactionRunner::new(pool.clone(), backend.clone(), RetryPolicy::immediate(5));
        let count = runner
            .run(|ctx| async move { ctx.execute_update_async(&update()).await })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(runner.attempts(), 3);
        assert_eq!(*backend.commits.lock(), 1);
        pool.close_async().await.unwrap();
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let pool = pool();
        let backend = Arc::new(Slow::default());
        let mut runner = AsyncTransactionRunner::new(pool.clone(), backend.clone(), RetryPolicy::immediate(5));
        let err = runner
            .run(|_ctx| async move {
                Err::<(), _>(TxnError::from(Status::invalid_argument("invalid statement")))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::InvalidArgument));
        assert_eq!(runner.attempts(), 1);
        assert_eq!(*backend.rollbacks.lock(), 1);
        assert_eq!(pool.stats().leased, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_statement_releases_session() {
        let pool = pool();
        let backend = Arc::new(Slow {
            latency: Duration::from_secs(30),
            ..Slow::default()
        });
        let token = CancellationToken::new();
        let mut runner = AsyncTransactionRunner::new(pool.clone(), backend.clone(), RetryPolicy::immediate(5))
            .with_cancellation(token.clone());
        let task = tokio::spawn(async move {
            let result = runner
                .run(|ctx| async move { ctx.execute_update_async(&update()).await })
                .await;
            (result, runner.state())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().leased, 1);
        token.cancel();
        let (result, state) = task.await.unwrap();
        assert!(matches!(result, Err(TxnError::Cancelled)));
        assert_eq!(state, TransactionState::Cancelled);
        assert_eq!(*backend.rollbacks.lock(), 1);
        assert_eq!(*backend.commits.lock(), 0);
        assert_eq!(pool.stats().leased, 0);
        pool.close_async().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_before_start_never_leases() {
        let pool = pool();
        let token = CancellationToken::new();
        token.cancel();
        let mut runner =
            AsyncTransactionRunner::new(pool.clone(), Arc::new(Slow::default()), RetryPolicy::immediate(5))
                .with_cancellation(token);
        let result = runner.run(|_ctx| async move { Ok(()) }).await;
        assert!(matches!(result, Err(TxnError::Cancelled)));
        assert_eq!(runner.attempts(), 0);
        assert_eq!(pool.stats().created, 0);
    }

    #[tokio::test]
    async fn dropped_future_releases_session() {
        let pool = pool();
        let backend = Arc::new(Slow {
            latency: Duration::from_secs(30),
            ..Slow::default()
        });
        let mut runner = AsyncTransactionRunner::new(pool.clone(), backend, RetryPolicy::immediate(5));
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            runner.run(|ctx| async move { ctx.execute_update_async(&update()).await }),
        )
        .await;
        assert!(outcome.is_err());
        let stats = pool.stats();
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.idle, 1);
        pool.close_async().await.unwrap();
    }
}
