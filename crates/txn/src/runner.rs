use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vellum_core_types::{Status, TransactionHandle};
use vellum_session_pool::{PooledSession, SessionPool};

use crate::backoff::RetryPolicy;
use crate::context::TransactionContext;
use crate::error::TxnError;
use crate::executor::StatementExecutor;
use crate::metrics;
use crate::state::{classify, is_retryable, Lifecycle, Step, TransactionState};

/// Blocking read/write transaction runner.
///
/// Leases a session, runs the unit of work and commits its buffered
/// mutations. Attempts that end in ABORTED are retried on the same session
/// after a backoff; any other error is returned as is.
pub struct TransactionRunner {
    pool: SessionPool,
    executor: Arc<dyn StatementExecutor>,
    policy: RetryPolicy,
    lifecycle: Lifecycle,
}

impl TransactionRunner {
    pub fn new(pool: SessionPool, executor: Arc<dyn StatementExecutor>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            executor,
            policy,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.lifecycle.state()
    }

    /// Attempts made so far, including the one in flight.
    pub fn attempts(&self) -> u32 {
        self.lifecycle.attempts()
    }

    pub fn run<T, F>(&mut self, work: F) -> Result<T, TxnError>
    where
        F: FnMut(&TransactionContext) -> Result<T, TxnError>,
    {
        self.lifecycle.begin()?;
        metrics::record_started();
        let mut session = match self.pool.acquire() {
            Ok(session) => session,
            Err(err) => {
                self.lifecycle.advance(TransactionState::Failed);
                metrics::record_failed();
                return Err(err.into());
            }
        };
        let result = self.drive(&mut session, work);
        session.release();
        result
    }

    /// Runs on a session the caller already holds; the lease stays with the caller.
    pub fn run_with_session<T, F>(
        &mut self,
        session: &mut PooledSession,
        work: F,
    ) -> Result<T, TxnError>
    where
        F: FnMut(&TransactionContext) -> Result<T, TxnError>,
    {
        self.lifecycle.begin()?;
        metrics::record_started();
        self.drive(session, work)
    }

    fn drive<T, F>(&mut self, session: &mut PooledSession, mut work: F) -> Result<T, TxnError>
    where
        F: FnMut(&TransactionContext) -> Result<T, TxnError>,
    {
        loop {
            let attempt = self.lifecycle.next_attempt();
            let handle = TransactionHandle::new(session.id().clone(), attempt);
            let ctx = TransactionContext::new(
                Arc::clone(&self.executor),
                handle.clone(),
                CancellationToken::new(),
            );
            let result = work(&ctx);
            let outcome = ctx.finish();

            let status = match classify(result, outcome) {
                Step::Commit(value, mutations) => {
                    self.lifecycle.advance(TransactionState::Committing);
                    match self.executor.commit(&handle, &mutations) {
                        Ok(()) => {
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
                        Err(status) if is_retryable(&status) => status,
                        Err(status) => return Err(self.fail(&handle, status.into())),
                    }
                }
                Step::Retry(status) => status,
                Step::Fail(err) => return Err(self.fail(&handle, err)),
            };

            self.lifecycle.advance(TransactionState::Aborted);
            metrics::record_aborted();
            if !self.policy.allows(attempt) {
                return Err(exhausted(&mut self.lifecycle, &handle, status));
            }
            if status.is_session_not_found() {
                debug!(target: "txn", session = %handle.session, "renewing lost session");
                if let Err(err) = session.renew() {
                    self.lifecycle.advance(TransactionState::Failed);
                    metrics::record_failed();
                    return Err(err.into());
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
                thread::sleep(delay);
            }
        }
    }

    fn fail(&mut self, handle: &TransactionHandle, err: TxnError) -> TxnError {
        if let Err(rollback) = self.executor.rollback(handle) {
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
}

pub(crate) fn exhausted(
    lifecycle: &mut Lifecycle,
    handle: &TransactionHandle,
    last: Status,
) -> TxnError {
    lifecycle.advance(TransactionState::RetriesExhausted);
    metrics::record_exhausted();
    warn!(
        target: "txn",
        session = %handle.session,
        attempts = handle.attempt,
        last = %last,
        "transaction retries exhausted"
    );
    TxnError::AbortedExceeded {
        attempts: handle.attempt,
        last,
    }
}
