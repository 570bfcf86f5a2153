use std::sync::Arc;

use async_trait::async_trait;
use vellum_core_types::{Mutation, Statement, StatementResult, Status, TransactionHandle};

/// Backend capability the transaction runners drive.
///
/// The async methods default to the blocking ones; executors that can
/// suspend (for example to simulate latency) override both.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    fn execute(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status>;

    fn commit(&self, _txn: &TransactionHandle, _mutations: &[Mutation]) -> Result<(), Status> {
        Ok(())
    }

    fn rollback(&self, _txn: &TransactionHandle) -> Result<(), Status> {
        Ok(())
    }

    async fn execute_async(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status> {
        self.execute(statement, txn)
    }

    async fn commit_async(
        &self,
        txn: &TransactionHandle,
        mutations: &[Mutation],
    ) -> Result<(), Status> {
        self.commit(txn, mutations)
    }

    async fn rollback_async(&self, txn: &TransactionHandle) -> Result<(), Status> {
        self.rollback(txn)
    }
}

#[async_trait]
impl<E> StatementExecutor for Arc<E>
where
    E: StatementExecutor + ?Sized,
{
    fn execute(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status> {
        (**self).execute(statement, txn)
    }

    fn commit(&self, txn: &TransactionHandle, mutations: &[Mutation]) -> Result<(), Status> {
        (**self).commit(txn, mutations)
    }

    fn rollback(&self, txn: &TransactionHandle) -> Result<(), Status> {
        (**self).rollback(txn)
    }

    async fn execute_async(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status> {
        (**self).execute_async(statement, txn).await
    }

    async fn commit_async(
        &self,
        txn: &TransactionHandle,
        mutations: &[Mutation],
    ) -> Result<(), Status> {
        (**self).commit_async(txn, mutations).await
    }

    async fn rollback_async(&self, txn: &TransactionHandle) -> Result<(), Status> {
        (**self).rollback_async(txn).await
    }
}
