//! Lifecycle hooks for suites that run transactions against a
//! [`ProgrammableBackend`].
//!
//! `setup` once per suite, `before`/`after` around each test, `teardown` at
//! the end. The backend is shared by every test in the suite, so suites
//! using one fixture should not run tests concurrently.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;
use vellum_mock_backend::{fixtures, ProgrammableBackend};
use vellum_session_pool::SessionPoolOptions;
use vellum_txn::RetryPolicy;

use crate::client::DatabaseClient;

/// The two clients every test gets: one on a leak-checked default pool and
/// one on a pool that starts empty and grows a session at a time.
pub struct ClientPair {
    pub client: DatabaseClient,
    pub client_with_empty_pool: DatabaseClient,
}

pub struct BackendFixture {
    backend: Arc<ProgrammableBackend>,
    retry: RetryPolicy,
}

impl BackendFixture {
    pub fn setup() -> Self {
        Self::with_backend(Arc::new(ProgrammableBackend::new()))
    }

    pub fn with_backend(backend: Arc<ProgrammableBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                jitter: 0.2,
                max_delay: Duration::from_millis(20),
            },
        }
    }

    pub fn backend(&self) -> &Arc<ProgrammableBackend> {
        &self.backend
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Registers the canned statements and builds fresh clients.
    pub fn before(&self) -> Result<ClientPair> {
        fixtures::register_all(&self.backend)
            .context("failed to register canned statements")?;
        self.backend
            .set_abort_probability(0.0)
            .context("failed to clear abort probability")?;

        let client = DatabaseClient::new(
            SessionPoolOptions {
                fail_on_session_leak: true,
                ..SessionPoolOptions::default()
            },
            self.retry.clone(),
            self.backend.clone(),
        )
        .context("failed to build client")?;
        let client_with_empty_pool = DatabaseClient::new(
            SessionPoolOptions {
                min_sessions: 0,
                inc_step: 1,
                fail_on_session_leak: true,
                ..SessionPoolOptions::default()
            },
            self.retry.clone(),
            self.backend.clone(),
        )
        .context("failed to build client with empty pool")?;
        debug!(target: "vellum", "fixture clients ready");
        Ok(ClientPair {
            client,
            client_with_empty_pool,
        })
    }

    /// Closes both clients, then clears execution times and backend state.
    /// A leak on either client is returned after the cleanup has run.
    pub fn after(&self, pair: ClientPair) -> Result<()> {
        let closed = pair
            .client
            .close()
            .context("client leaked sessions")
            .and(
                pair.client_with_empty_pool
                    .close()
                    .context("client with empty pool leaked sessions"),
            );
        self.backend.remove_all_execution_times();
        self.backend.reset();
        closed
    }

    pub async fn after_async(&self, pair: ClientPair) -> Result<()> {
        let first = pair
            .client
            .close_async()
            .await
            .context("client leaked sessions");
        let second = pair
            .client_with_empty_pool
            .close_async()
            .await
            .context("client with empty pool leaked sessions");
        self.backend.remove_all_execution_times();
        self.backend.reset();
        first.and(second)
    }

    pub fn teardown(&self) {
        self.backend.remove_all_execution_times();
        self.backend.reset();
    }
}
