use std::time::Duration;

use thiserror::Error;
use vellum_core_types::SessionId;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PoolError {
    #[error("invalid session pool options: {0}")]
    InvalidOptions(String),
    #[error("no session available after waiting {waited:?} (max_sessions={max_sessions})")]
    Exhausted { waited: Duration, max_sessions: usize },
    #[error("session pool is closed")]
    Closed,
    #[error("{} session(s) leaked at pool close: {}", ids.len(), join_ids(ids))]
    SessionLeak { ids: Vec<SessionId> },
}

fn join_ids(ids: &[SessionId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
