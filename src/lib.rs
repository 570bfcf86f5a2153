//! Vellum database client
//!
//! A bounded session pool plus read/write transaction runners that retry
//! the caller's work when the backend aborts it.

pub mod client;
pub mod config;
pub mod fixture;

pub use crate::client::DatabaseClient;
pub use crate::config::{load_config, BackendConfig, ClientConfig, PoolConfig, RetryConfig};
pub use crate::fixture::{BackendFixture, ClientPair};

pub use vellum_core_types::{
    Code, Column, ColumnType, Mutation, MutationOp, ResultSet, SessionId, Statement,
    StatementResult, Status, StatusDetail, TransactionHandle, Value,
};
pub use vellum_mock_backend::{BackendMethod, ProgrammableBackend, SimulatedExecutionTime};
pub use vellum_session_pool::{PoolError, PoolStats, PooledSession, SessionPool, SessionPoolOptions};
pub use vellum_txn::{
    AsyncTransactionRunner, CancellationToken, RetryPolicy, StatementExecutor,
    TransactionContext, TransactionRunner, TransactionState, TxnError,
};
