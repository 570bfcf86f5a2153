use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use serial_test::serial;
use vellum_client::{
    BackendFixture, BackendMethod, CancellationToken, Code, SimulatedExecutionTime,
    TransactionState, TxnError,
};
use vellum_mock_backend::fixtures::{
    INVALID_UPDATE_STATEMENT, READ_MULTIPLE_KEY_VALUE_STATEMENT, READ_ONE_EMPTY_KEY_VALUE_STATEMENT,
    UPDATE_COUNT, UPDATE_STATEMENT,
};

static FIXTURE: Lazy<BackendFixture> = Lazy::new(BackendFixture::setup);

#[tokio::test]
#[serial]
async fn async_update_commits() -> Result<()> {
    let pair = FIXTURE.before()?;
    let count = pair
        .client
        .run_transaction_async(|ctx| async move { ctx.execute_update_async(&UPDATE_STATEMENT).await })
        .await?;
    assert_eq!(count, UPDATE_COUNT);
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn async_reads_see_registered_rows() -> Result<()> {
    let pair = FIXTURE.before()?;
    let (empty, multiple) = pair
        .client
        .run_transaction_async(|ctx| async move {
            let empty = ctx
                .execute_query_async(&READ_ONE_EMPTY_KEY_VALUE_STATEMENT)
                .await?;
            let multiple = ctx
                .execute_query_async(&READ_MULTIPLE_KEY_VALUE_STATEMENT)
                .await?;
            Ok((empty, multiple))
        })
        .await?;
    assert!(empty.is_empty());
    assert_eq!(multiple.len(), 3);
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn async_abort_is_retried_on_the_same_session() -> Result<()> {
    let pair = FIXTURE.before()?;
    FIXTURE.backend().abort_next_statement();
    let mut runner = pair.client.async_runner();
    runner
        .run(|ctx| async move { ctx.execute_update_async(&UPDATE_STATEMENT).await })
        .await?;
    assert_eq!(runner.attempts(), 2);
    let requests = FIXTURE.backend().requests();
    assert_eq!(requests[0].session, requests[1].session);
    assert_ne!(requests[0].transaction, requests[1].transaction);
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn async_certain_abort_is_exhausted() -> Result<()> {
    let pair = FIXTURE.before()?;
    FIXTURE.backend().set_abort_probability(1.0)?;
    let mut runner = pair.client.async_runner();
    let err = runner
        .run(|ctx| async move { ctx.execute_update_async(&UPDATE_STATEMENT).await })
        .await
        .unwrap_err();
    assert!(matches!(err, TxnError::AbortedExceeded { .. }));
    assert_eq!(runner.attempts(), FIXTURE.retry_policy().max_attempts);
    assert_eq!(runner.state(), TransactionState::RetriesExhausted);
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn async_invalid_argument_fails_once() -> Result<()> {
    let pair = FIXTURE.before()?;
    let mut runner = pair.client.async_runner();
    let err = runner
        .run(|ctx| async move { ctx.execute_update_async(&INVALID_UPDATE_STATEMENT).await })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(Code::InvalidArgument));
    assert_eq!(runner.attempts(), 1);
    FIXTURE.after_async(pair).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn cancelling_an_in_flight_transaction_releases_its_session() -> Result<()> {
    let pair = FIXTURE.before()?;
    FIXTURE.backend().set_execution_time(
        BackendMethod::ExecuteSql,
        SimulatedExecutionTime::latency(Duration::from_secs(30), Duration::ZERO),
    );
    let token = CancellationToken::new();
    let mut runner = pair
        .client_with_empty_pool
        .async_runner()
        .with_cancellation(token.clone());
    let task = tokio::spawn(async move {
        let result = runner
            .run(|ctx| async move { ctx.execute_update_async(&UPDATE_STATEMENT).await })
            .await;
        (result, runner.state())
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pair.client_with_empty_pool.pool().stats().leased, 1);
    token.cancel();
    let (result, state) = task.await?;
    assert!(matches!(result, Err(TxnError::Cancelled)));
    assert_eq!(state, TransactionState::Cancelled);

    let stats = pair.client_with_empty_pool.pool().stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);
    assert!(FIXTURE.backend().committed().is_empty());
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn dropping_a_transaction_future_releases_its_session() -> Result<()> {
    let pair = FIXTURE.before()?;
    FIXTURE.backend().set_execution_time(
        BackendMethod::ExecuteSql,
        SimulatedExecutionTime::latency(Duration::from_secs(30), Duration::ZERO),
    );
    let pending = pair
        .client_with_empty_pool
        .run_transaction_async(|ctx| async move { ctx.execute_update_async(&UPDATE_STATEMENT).await });
    let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
    assert!(timed_out.is_err());
    assert_eq!(pair.client_with_empty_pool.pool().stats().leased, 0);
    FIXTURE.after_async(pair).await
}

#[tokio::test]
#[serial]
async fn concurrent_async_transactions_grow_the_empty_pool() -> Result<()> {
    let pair = FIXTURE.before()?;
    FIXTURE.backend().set_execution_time(
        BackendMethod::ExecuteSql,
        SimulatedExecutionTime::latency(Duration::from_millis(20), Duration::ZERO),
    );
    let client = &pair.client_with_empty_pool;
    let update = |ctx: vellum_client::TransactionContext| async move {
        ctx.execute_update_async(&UPDATE_STATEMENT).await
    };
    let (first, second) = tokio::join!(
        client.run_transaction_async(update),
        client.run_transaction_async(update)
    );
    assert_eq!(first?, UPDATE_COUNT);
    assert_eq!(second?, UPDATE_COUNT);
    assert_eq!(client.pool().stats().total, 2);
    FIXTURE.after_async(pair).await
}
