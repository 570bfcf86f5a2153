use std::fmt;

use uuid::Uuid;

mod mutation;
mod statement;
mod status;

pub use mutation::{Mutation, MutationOp};
pub use statement::{
    Column, ColumnType, ResultSet, Statement, StatementKey, StatementResult, Value,
};
pub use status::{Code, Status, StatusDetail};

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one attempt of a read/write transaction on a session.
///
/// Every retry gets a fresh `transaction` id; `attempt` starts at 1 and is
/// never reused within one logical transaction.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransactionHandle {
    pub session: SessionId,
    pub transaction: TransactionId,
    pub attempt: u32,
}

impl TransactionHandle {
    pub fn new(session: SessionId, attempt: u32) -> Self {
        Self {
            session,
            transaction: TransactionId::new(),
            attempt,
        }
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session={} txn={} attempt={}",
            self.session.0, self.transaction.0, self.attempt
        )
    }
}
