use std::future::Future;
use std::sync::Arc;

use tracing::debug;
use vellum_session_pool::{PoolError, SessionPool, SessionPoolOptions};
use vellum_txn::{
    AsyncTransactionRunner, RetryPolicy, StatementExecutor, TransactionContext, TxnError,
    TransactionRunner,
};

use crate::config::ClientConfig;

/// Entry point for running read/write transactions against one database.
///
/// Owns the session pool; every runner it hands out leases from that pool
/// and drives statements through the shared executor.
#[derive(Clone)]
pub struct DatabaseClient {
    pool: SessionPool,
    executor: Arc<dyn StatementExecutor>,
    retry: RetryPolicy,
}

impl DatabaseClient {
    pub fn new(
        options: SessionPoolOptions,
        retry: RetryPolicy,
        executor: Arc<dyn StatementExecutor>,
    ) -> Result<Self, PoolError> {
        let pool = SessionPool::new(options)?;
        debug!(
            target: "vellum",
            max_attempts = retry.max_attempts,
            "database client created"
        );
        Ok(Self {
            pool,
            executor,
            retry,
        })
    }

    pub fn from_config(
        config: &ClientConfig,
        executor: Arc<dyn StatementExecutor>,
    ) -> Result<Self, PoolError> {
        Self::new((&config.pool).into(), (&config.retry).into(), executor)
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn read_write_transaction(&self) -> TransactionRunner {
        TransactionRunner::new(
            self.pool.clone(),
            Arc::clone(&self.executor),
            self.retry.clone(),
        )
    }

    pub fn async_runner(&self) -> AsyncTransactionRunner {
        AsyncTransactionRunner::new(
            self.pool.clone(),
            Arc::clone(&self.executor),
            self.retry.clone(),
        )
    }

    pub fn run_transaction<T, F>(&self, work: F) -> Result<T, TxnError>
    where
        F: FnMut(&TransactionContext) -> Result<T, TxnError>,
    {
        self.read_write_transaction().run(work)
    }

    pub async fn run_transaction_async<T, F, Fut>(&self, work: F) -> Result<T, TxnError>
    where
        F: FnMut(TransactionContext) -> Fut,
        Fut: Future<Output = Result<T, TxnError>>,
    {
        self.async_runner().run(work).await
    }

    /// Closes the pool; reports leaked sessions when leak checking is on.
    pub fn close(&self) -> Result<(), PoolError> {
        self.pool.close()
    }

    pub async fn close_async(&self) -> Result<(), PoolError> {
        self.pool.close_async().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_mock_backend::{fixtures, ProgrammableBackend};

    fn client(backend: Arc<ProgrammableBackend>) -> DatabaseClient {
        let config = ClientConfig {
            pool: crate::config::PoolConfig {
                min_sessions: 1,
                max_sessions: 2,
                inc_step: 1,
                fail_on_session_leak: true,
                ..Default::default()
            },
            retry: RetryPolicy::immediate(3).into(),
            ..Default::default()
        };
        DatabaseClient::from_config(&config, backend).unwrap()
    }

    #[test]
    fn runs_update_and_closes_cleanly() {
        let backend = Arc::new(ProgrammableBackend::new());
        fixtures::register_all(&backend).unwrap();
        let client = client(backend.clone());
        let count = client
            .run_transaction(|ctx| ctx.execute_update(&fixtures::UPDATE_STATEMENT))
            .unwrap();
        assert_eq!(count, fixtures::UPDATE_COUNT);
        assert_eq!(backend.committed().len(), 1);
        client.close().unwrap();
    }

    #[test]
    fn leaked_session_fails_close() {
        let backend = Arc::new(ProgrammableBackend::new());
        let client = client(backend);
        let leaked = client.pool().acquire().unwrap();
        let err = client.close().unwrap_err();
        assert!(matches!(err, PoolError::SessionLeak { ref ids } if ids == &vec![leaked.id().clone()]));
        drop(leaked);
    }

    #[tokio::test]
    async fn async_transaction_commits() {
        let backend = Arc::new(ProgrammableBackend::new());
        fixtures::register_all(&backend).unwrap();
        let client = client(backend.clone());
        let rows = client
            .run_transaction_async(|ctx| async move {
                ctx.execute_query_async(&fixtures::READ_MULTIPLE_KEY_VALUE_STATEMENT)
                    .await
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        client.close_async().await.unwrap();
    }
}
