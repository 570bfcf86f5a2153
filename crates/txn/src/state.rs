use tracing::debug;
use vellum_core_types::{Mutation, Status};

use crate::context::AttemptOutcome;
use crate::error::TxnError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    Starting,
    Executing,
    Aborted,
    Committing,
    Done,
    Failed,
    RetriesExhausted,
    Cancelled,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Done
                | TransactionState::Failed
                | TransactionState::RetriesExhausted
                | TransactionState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        match (self, next) {
            (Starting, Executing) | (Starting, Failed) => true,
            (Executing, Aborted) | (Executing, Committing) | (Executing, Failed) => true,
            (Committing, Done) | (Committing, Aborted) | (Committing, Failed) => true,
            (Aborted, Executing) | (Aborted, RetriesExhausted) | (Aborted, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// State and attempt counter shared by the sync and async runners.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: TransactionState,
    attempts: u32,
    used: bool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: TransactionState::Starting,
            attempts: 0,
            used: false,
        }
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A runner drives exactly one logical transaction.
    pub(crate) fn begin(&mut self) -> Result<(), TxnError> {
        if self.used {
            return Err(Status::failed_precondition(
                "transaction runner has already been used",
            )
            .into());
        }
        self.used = true;
        Ok(())
    }

    pub(crate) fn next_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.advance(TransactionState::Executing);
        self.attempts
    }

    pub(crate) fn advance(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transaction transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            target: "txn",
            from = ?self.state,
            to = ?next,
            attempt = self.attempts,
            "transaction state change"
        );
        self.state = next;
    }
}

/// What the runner does after one invocation of the unit of work.
pub(crate) enum Step<T> {
    Commit(T, Vec<Mutation>),
    Retry(Status),
    Fail(TxnError),
}

pub(crate) fn is_retryable(status: &Status) -> bool {
    status.is_aborted() || status.is_session_not_found()
}

pub(crate) fn classify<T>(result: Result<T, TxnError>, outcome: AttemptOutcome) -> Step<T> {
    if let Err(TxnError::Cancelled) = result {
        return Step::Fail(TxnError::Cancelled);
    }
    // An ABORTED statement dooms the attempt even if the work swallowed it.
    if let Some(status) = outcome.aborted.or(outcome.session_lost) {
        return Step::Retry(status);
    }
    match result {
        Ok(value) => Step::Commit(value, outcome.mutations),
        Err(TxnError::Status(status)) if is_retryable(&status) => Step::Retry(status),
        Err(err) => Step::Fail(err),
    }
}
