use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::debug;
use vellum_core_types::{
    Mutation, ResultSet, SessionId, Statement, StatementKey, StatementResult, Status,
    TransactionHandle, TransactionId,
};
use vellum_txn::StatementExecutor;

use crate::timing::{BackendMethod, SimulatedExecutionTime};

const DEFAULT_SEED: u64 = 0x5eed_0f_ab07;

#[derive(Debug, Error, PartialEq)]
pub enum BackendError {
    #[error("abort probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: BackendMethod,
    pub session: SessionId,
    pub transaction: TransactionId,
    pub attempt: u32,
    pub sql: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommittedTransaction {
    pub handle: TransactionHandle,
    pub mutations: Vec<Mutation>,
}

/// Statement executor answering from a table of canned results.
///
/// The table is shared by every caller: lookups take a read lock and
/// registration or [`ProgrammableBackend::reset`] take the write lock.
pub struct ProgrammableBackend {
    results: RwLock<HashMap<StatementKey, StatementResult>>,
    abort_probability: RwLock<f64>,
    abort_next: AtomicBool,
    seed: u64,
    rng: Mutex<StdRng>,
    execution_times: Mutex<HashMap<BackendMethod, SimulatedExecutionTime>>,
    invalidated: DashSet<SessionId>,
    requests: Mutex<Vec<RecordedRequest>>,
    committed: Mutex<Vec<CommittedTransaction>>,
}

impl Default for ProgrammableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgrammableBackend {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Backend whose abort draws and latency jitter replay from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            abort_probability: RwLock::new(0.0),
            abort_next: AtomicBool::new(false),
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            execution_times: Mutex::new(HashMap::new()),
            invalidated: DashSet::new(),
            requests: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn put_result(&self, statement: &Statement, result: StatementResult) {
        let key = statement.key();
        debug!(target: "mock_backend", statement = %key, "registered statement result");
        self.results.write().insert(key, result);
    }

    pub fn put_update(&self, statement: &Statement, count: i64) {
        self.put_result(statement, StatementResult::UpdateCount(count));
    }

    pub fn put_query(&self, statement: &Statement, rows: ResultSet) {
        self.put_result(statement, StatementResult::ResultSet(rows));
    }

    pub fn put_error(&self, statement: &Statement, status: Status) {
        self.put_result(statement, StatementResult::Error(status));
    }

    pub fn registered(&self) -> usize {
        self.results.read().len()
    }

    pub fn set_abort_probability(&self, probability: f64) -> Result<(), BackendError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(BackendError::InvalidProbability(probability));
        }
        *self.abort_probability.write() = probability;
        Ok(())
    }

    pub fn abort_probability(&self) -> f64 {
        *self.abort_probability.read()
    }

    /// Makes the next executed statement fail with ABORTED.
    pub fn abort_next_statement(&self) {
        self.abort_next.store(true, Ordering::SeqCst);
    }

    pub fn set_execution_time(&self, method: BackendMethod, timing: SimulatedExecutionTime) {
        self.execution_times.lock().insert(method, timing);
    }

    pub fn remove_all_execution_times(&self) {
        self.execution_times.lock().clear();
    }

    /// Every later call on `session` fails with NOT_FOUND.
    pub fn invalidate_session(&self, session: &SessionId) {
        self.invalidated.insert(session.clone());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count_requests(&self, method: BackendMethod) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    pub fn committed(&self) -> Vec<CommittedTransaction> {
        self.committed.lock().clone()
    }

    /// Forgets registered results, injected failures and the request log,
    /// and replays the random source from its seed. Execution times are
    /// kept; see [`ProgrammableBackend::remove_all_execution_times`].
    pub fn reset(&self) {
        self.results.write().clear();
        *self.abort_probability.write() = 0.0;
        self.abort_next.store(false, Ordering::SeqCst);
        *self.rng.lock() = StdRng::seed_from_u64(self.seed);
        self.invalidated.clear();
        self.requests.lock().clear();
        self.committed.lock().clear();
        debug!(target: "mock_backend", "backend reset");
    }

    fn record(&self, method: BackendMethod, txn: &TransactionHandle, sql: Option<&str>) {
        self.requests.lock().push(RecordedRequest {
            method,
            session: txn.session.clone(),
            transaction: txn.transaction.clone(),
            attempt: txn.attempt,
            sql: sql.map(str::to_owned),
        });
    }

    /// Latency to wait and error to return for one call of `method`.
    fn simulate(&self, method: BackendMethod) -> (Duration, Option<Status>) {
        let mut times = self.execution_times.lock();
        match times.get_mut(&method) {
            Some(timing) => {
                let latency = timing.sample_latency(&mut self.rng.lock());
                (latency, timing.take_error())
            }
            None => (Duration::ZERO, None),
        }
    }

    fn check_session(&self, txn: &TransactionHandle) -> Result<(), Status> {
        if self.invalidated.contains(&txn.session) {
            return Err(Status::session_not_found(&txn.session));
        }
        Ok(())
    }

    fn draw_abort(&self) -> bool {
        let probability = *self.abort_probability.read();
        let draw: f64 = self.rng.lock().gen();
        draw < probability
    }

    fn respond(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
        injected: Option<Status>,
    ) -> Result<StatementResult, Status> {
        if let Some(status) = injected {
            return Err(status);
        }
        self.check_session(txn)?;
        let key = statement.key();
        let result = self
            .results
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Status::unknown_statement(key.clone()))?;
        if self.abort_next.swap(false, Ordering::SeqCst) || self.draw_abort() {
            debug!(target: "mock_backend", statement = %key, attempt = txn.attempt, "injecting abort");
            return Err(Status::aborted("Transaction was aborted"));
        }
        result.into_result()
    }

    fn finish_commit(
        &self,
        txn: &TransactionHandle,
        mutations: &[Mutation],
        injected: Option<Status>,
    ) -> Result<(), Status> {
        if let Some(status) = injected {
            return Err(status);
        }
        self.check_session(txn)?;
        if self.draw_abort() {
            debug!(target: "mock_backend", attempt = txn.attempt, "injecting abort at commit");
            return Err(Status::aborted("Transaction was aborted"));
        }
        self.committed.lock().push(CommittedTransaction {
            handle: txn.clone(),
            mutations: mutations.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for ProgrammableBackend {
    fn execute(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status> {
        self.record(BackendMethod::ExecuteSql, txn, Some(statement.sql()));
        let (latency, injected) = self.simulate(BackendMethod::ExecuteSql);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        self.respond(statement, txn, injected)
    }

    fn commit(&self, txn: &TransactionHandle, mutations: &[Mutation]) -> Result<(), Status> {
        self.record(BackendMethod::Commit, txn, None);
        let (latency, injected) = self.simulate(BackendMethod::Commit);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        self.finish_commit(txn, mutations, injected)
    }

    fn rollback(&self, txn: &TransactionHandle) -> Result<(), Status> {
        self.record(BackendMethod::Rollback, txn, None);
        let (latency, injected) = self.simulate(BackendMethod::Rollback);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        injected.map_or(Ok(()), Err)
    }

    async fn execute_async(
        &self,
        statement: &Statement,
        txn: &TransactionHandle,
    ) -> Result<StatementResult, Status> {
        self.record(BackendMethod::ExecuteSql, txn, Some(statement.sql()));
        let (latency, injected) = self.simulate(BackendMethod::ExecuteSql);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.respond(statement, txn, injected)
    }

    async fn commit_async(
        &self,
        txn: &TransactionHandle,
        mutations: &[Mutation],
    ) -> Result<(), Status> {
        self.record(BackendMethod::Commit, txn, None);
        let (latency, injected) = self.simulate(BackendMethod::Commit);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.finish_commit(txn, mutations, injected)
    }

    async fn rollback_async(&self, txn: &TransactionHandle) -> Result<(), Status> {
        self.record(BackendMethod::Rollback, txn, None);
        let (latency, injected) = self.simulate(BackendMethod::Rollback);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        injected.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use vellum_core_types::Code;

    fn handle() -> TransactionHandle {
        TransactionHandle::new(SessionId::new(), 1)
    }

    fn update() -> Statement {
        Statement::new("UPDATE FOO SET BAR=1 WHERE BAZ=2")
    }

    #[test]
    fn answers_registered_statements() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        let result = backend.execute(&update(), &handle()).unwrap();
        assert_eq!(result.update_count(), Some(1));
        assert_eq!(backend.count_requests(BackendMethod::ExecuteSql), 1);
    }

    #[test]
    fn unknown_statement_names_its_key() {
        let backend = ProgrammableBackend::new();
        let err = backend
            .execute(&Statement::new("SELECT 1"), &handle())
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.is_unknown_statement());
        assert!(err.message().contains("SELECT 1"));
    }

    #[test]
    fn registered_error_is_echoed() {
        let backend = ProgrammableBackend::new();
        backend.put_error(&update(), Status::invalid_argument("invalid statement"));
        let err = backend.execute(&update(), &handle()).unwrap_err();
        assert_eq!(err, Status::invalid_argument("invalid statement"));
    }

    #[test]
    fn abort_probability_bounds() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        assert_eq!(
            backend.set_abort_probability(1.5),
            Err(BackendError::InvalidProbability(1.5))
        );
        assert!(backend.set_abort_probability(-0.1).is_err());

        backend.set_abort_probability(1.0).unwrap();
        for _ in 0..20 {
            assert!(backend.execute(&update(), &handle()).unwrap_err().is_aborted());
        }
        backend.set_abort_probability(0.0).unwrap();
        for _ in 0..20 {
            assert!(backend.execute(&update(), &handle()).is_ok());
        }
    }

    #[test]
    fn commit_is_subject_to_the_abort_draw() {
        let backend = ProgrammableBackend::new();
        backend.set_abort_probability(1.0).unwrap();
        let txn = handle();
        let err = backend.commit(&txn, &[Mutation::insert("FOO")]).unwrap_err();
        assert!(err.is_aborted());
        assert!(backend.committed().is_empty());

        backend.set_abort_probability(0.0).unwrap();
        backend.abort_next_statement();
        backend.commit(&txn, &[Mutation::insert("FOO")]).unwrap();
        assert_eq!(backend.committed().len(), 1);
    }

    #[test]
    fn abort_draws_replay_after_reset() {
        let backend = ProgrammableBackend::with_seed(42);
        let outcomes = |backend: &ProgrammableBackend| {
            backend.put_update(&update(), 1);
            backend.set_abort_probability(0.5).unwrap();
            (0..32)
                .map(|_| backend.execute(&update(), &handle()).is_ok())
                .collect::<Vec<_>>()
        };
        let first = outcomes(&backend);
        backend.reset();
        assert_eq!(outcomes(&backend), first);
    }

    #[test]
    fn abort_next_fires_once() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        backend.abort_next_statement();
        assert!(backend.execute(&update(), &handle()).unwrap_err().is_aborted());
        assert!(backend.execute(&update(), &handle()).is_ok());
    }

    #[test]
    fn invalidated_session_is_not_found() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        let txn = handle();
        backend.invalidate_session(&txn.session);
        let err = backend.execute(&update(), &txn).unwrap_err();
        assert!(err.is_session_not_found());
        assert!(backend.commit(&txn, &[]).unwrap_err().is_session_not_found());
        assert!(backend.execute(&update(), &handle()).is_ok());
    }

    #[test]
    fn reset_clears_results_and_logs() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        let txn = handle();
        backend.execute(&update(), &txn).unwrap();
        backend.commit(&txn, &[Mutation::insert("FOO")]).unwrap();
        assert_eq!(backend.committed().len(), 1);

        backend.reset();
        assert_eq!(backend.registered(), 0);
        assert!(backend.requests().is_empty());
        assert!(backend.committed().is_empty());
        assert!(backend
            .execute(&update(), &txn)
            .unwrap_err()
            .is_unknown_statement());

        backend.put_update(&update(), 7);
        let result = backend.execute(&update(), &txn).unwrap();
        assert_eq!(result.update_count(), Some(7));
    }

    #[test]
    fn execution_time_injects_latency_and_errors() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        backend.set_execution_time(
            BackendMethod::ExecuteSql,
            SimulatedExecutionTime::latency(Duration::from_millis(20), Duration::ZERO),
        );
        let started = Instant::now();
        backend.execute(&update(), &handle()).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));

        backend.set_execution_time(
            BackendMethod::Commit,
            SimulatedExecutionTime::of_error(Status::aborted("Transaction was aborted")),
        );
        assert!(backend.commit(&handle(), &[]).unwrap_err().is_aborted());
        assert!(backend.commit(&handle(), &[]).is_ok());

        backend.remove_all_execution_times();
        let started = Instant::now();
        backend.execute(&update(), &handle()).unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn async_calls_suspend_instead_of_blocking() {
        let backend = ProgrammableBackend::new();
        backend.put_update(&update(), 1);
        backend.set_execution_time(
            BackendMethod::ExecuteSql,
            SimulatedExecutionTime::latency(Duration::from_millis(10), Duration::ZERO),
        );
        let txn = handle();
        let stmt = update();
        let (a, b) = tokio::join!(
            backend.execute_async(&stmt, &txn),
            backend.execute_async(&stmt, &txn)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.count_requests(BackendMethod::ExecuteSql), 2);
    }
}
