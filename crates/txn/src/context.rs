use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use vellum_core_types::{
    Mutation, ResultSet, SessionId, Statement, StatementResult, Status, TransactionHandle,
};

use crate::error::TxnError;
use crate::executor::StatementExecutor;

/// What one attempt left behind once the unit of work returned.
#[derive(Debug, Default)]
pub(crate) struct AttemptOutcome {
    pub aborted: Option<Status>,
    pub session_lost: Option<Status>,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Default)]
struct AttemptState {
    mutations: Vec<Mutation>,
    statements: usize,
    aborted: Option<Status>,
    session_lost: Option<Status>,
    finished: bool,
}

struct ContextInner {
    executor: Arc<dyn StatementExecutor>,
    handle: TransactionHandle,
    cancel: CancellationToken,
    state: Mutex<AttemptState>,
    // Held across an async statement so overlapping calls from clones queue.
    statement_turn: tokio::sync::Mutex<()>,
}

/// Capability handed to the unit of work for a single attempt.
///
/// Statements run against the attempt's session in the order they are
/// issued. Mutations are buffered and only reach the backend on commit, so
/// a retried attempt starts from an empty buffer. Once an attempt has seen
/// ABORTED every further statement fails with that status.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<ContextInner>,
}

impl TransactionContext {
    pub(crate) fn new(
        executor: Arc<dyn StatementExecutor>,
        handle: TransactionHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                executor,
                handle,
                cancel,
                state: Mutex::new(AttemptState::default()),
                statement_turn: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.inner.handle.attempt
    }

    pub fn handle(&self) -> &TransactionHandle {
        &self.inner.handle
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.handle.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn buffer(&self, mutation: Mutation) -> Result<(), TxnError> {
        self.checkpoint()?;
        self.inner.state.lock().mutations.push(mutation);
        Ok(())
    }

    pub fn buffer_all(&self, mutations: impl IntoIterator<Item = Mutation>) -> Result<(), TxnError> {
        self.checkpoint()?;
        self.inner.state.lock().mutations.extend(mutations);
        Ok(())
    }

    pub fn execute(&self, statement: &Statement) -> Result<StatementResult, TxnError> {
        self.checkpoint()?;
        let result = self
            .inner
            .executor
            .execute(statement, &self.inner.handle)
            .and_then(StatementResult::into_result);
        self.observe(result)
    }

    pub fn execute_update(&self, statement: &Statement) -> Result<i64, TxnError> {
        self.execute(statement).and_then(expect_update_count)
    }

    pub fn execute_query(&self, statement: &Statement) -> Result<ResultSet, TxnError> {
        self.execute(statement).and_then(expect_result_set)
    }

    pub async fn execute_async(&self, statement: &Statement) -> Result<StatementResult, TxnError> {
        self.checkpoint()?;
        let inner = &self.inner;
        let _turn = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(TxnError::Cancelled),
            turn = inner.statement_turn.lock() => turn,
        };
        // A statement queued behind an abort must observe it.
        self.checkpoint()?;
        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(TxnError::Cancelled),
            result = inner.executor.execute_async(statement, &inner.handle) => result,
        };
        self.observe(result.and_then(StatementResult::into_result))
    }

    pub async fn execute_update_async(&self, statement: &Statement) -> Result<i64, TxnError> {
        self.execute_async(statement)
            .await
            .and_then(expect_update_count)
    }

    pub async fn execute_query_async(&self, statement: &Statement) -> Result<ResultSet, TxnError> {
        self.execute_async(statement)
            .await
            .and_then(expect_result_set)
    }

    pub fn statement_count(&self) -> usize {
        self.inner.state.lock().statements
    }

    pub fn buffered_mutations(&self) -> usize {
        self.inner.state.lock().mutations.len()
    }

    fn checkpoint(&self) -> Result<(), TxnError> {
        if self.inner.cancel.is_cancelled() {
            return Err(TxnError::Cancelled);
        }
        let state = self.inner.state.lock();
        if state.finished {
            return Err(Status::failed_precondition(format!(
                "attempt {} of this transaction has already finished",
                self.inner.handle.attempt
            ))
            .into());
        }
        if let Some(status) = state.aborted.as_ref().or(state.session_lost.as_ref()) {
            return Err(status.clone().into());
        }
        Ok(())
    }

    fn observe(
        &self,
        result: Result<StatementResult, Status>,
    ) -> Result<StatementResult, TxnError> {
        let mut state = self.inner.state.lock();
        state.statements += 1;
        match result {
            Ok(result) => Ok(result),
            Err(status) => {
                if status.is_aborted() {
                    state.aborted.get_or_insert_with(|| status.clone());
                } else if status.is_session_not_found() {
                    state.session_lost.get_or_insert_with(|| status.clone());
                }
                Err(status.into())
            }
        }
    }

    /// Closes the attempt; clones held by the work see it as finished.
    pub(crate) fn finish(&self) -> AttemptOutcome {
        let mut state = self.inner.state.lock();
        state.finished = true;
        AttemptOutcome {
            aborted: state.aborted.take(),
            session_lost: state.session_lost.take(),
            mutations: std::mem::take(&mut state.mutations),
        }
    }
}

fn expect_update_count(result: StatementResult) -> Result<i64, TxnError> {
    result.update_count().ok_or_else(|| {
        Status::invalid_argument("statement did not return an update count").into()
    })
}

fn expect_result_set(result: StatementResult) -> Result<ResultSet, TxnError> {
    match result {
        StatementResult::ResultSet(rows) => Ok(rows),
        _ => Err(Status::invalid_argument("statement did not return a result set").into()),
    }
}
