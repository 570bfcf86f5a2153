pub mod async_runner;
pub mod backoff;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod runner;
pub mod state;

pub use async_runner::AsyncTransactionRunner;
pub use backoff::RetryPolicy;
pub use context::TransactionContext;
pub use error::TxnError;
pub use executor::StatementExecutor;
pub use runner::TransactionRunner;
pub use state::TransactionState;
pub use tokio_util::sync::CancellationToken;
