use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::statement::StatementKey;
use crate::SessionId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Unavailable,
    Internal,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured detail attached to a [`Status`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusDetail {
    /// Backend-suggested delay before retrying an aborted transaction.
    RetryDelay(Duration),
    SessionNotFound(SessionId),
    UnknownStatement(StatementKey),
}

/// Error reported by a statement executor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
    detail: Option<StatusDetail>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn session_not_found(session: &SessionId) -> Self {
        Self::new(Code::NotFound, format!("Session not found: {}", session.0))
            .with_detail(StatusDetail::SessionNotFound(session.clone()))
    }

    pub fn unknown_statement(key: StatementKey) -> Self {
        Self::new(
            Code::Internal,
            format!("There is no result registered for the statement: {key}"),
        )
        .with_detail(StatusDetail::UnknownStatement(key))
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&StatusDetail> {
        self.detail.as_ref()
    }

    pub fn is_aborted(&self) -> bool {
        self.code == Code::Aborted
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self.detail, Some(StatusDetail::SessionNotFound(_)))
    }

    pub fn is_unknown_statement(&self) -> bool {
        matches!(self.detail, Some(StatusDetail::UnknownStatement(_)))
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self.detail {
            Some(StatusDetail::RetryDelay(delay)) => Some(delay),
            _ => None,
        }
    }
}
