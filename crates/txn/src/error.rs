use thiserror::Error;
use vellum_core_types::{Code, Status};
use vellum_session_pool::PoolError;

#[derive(Debug, Error)]
pub enum TxnError {
    /// Error reported by the backend, surfaced verbatim.
    #[error(transparent)]
    Status(#[from] Status),
    #[error("transaction aborted {attempts} time(s), giving up: {last}")]
    AbortedExceeded { attempts: u32, last: Status },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("transaction cancelled")]
    Cancelled,
    /// Error raised by the caller's unit of work.
    #[error(transparent)]
    Work(anyhow::Error),
}

impl TxnError {
    pub fn work(err: impl Into<anyhow::Error>) -> Self {
        TxnError::Work(err.into())
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            TxnError::Status(status) => Some(status),
            TxnError::AbortedExceeded { last, .. } => Some(last),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<Code> {
        self.status().map(Status::code)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TxnError::Status(status) if status.is_aborted())
    }
}
