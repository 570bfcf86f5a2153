use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use vellum_core_types::SessionId;

use crate::error::PoolError;
use crate::model::{PoolStats, Session, SessionPoolOptions, SessionState};

#[derive(Debug, Default)]
struct PoolInner {
    sessions: HashMap<SessionId, Session>,
    /// Most recently used first.
    idle: VecDeque<SessionId>,
    closed: bool,
    waiters: usize,
    created: u64,
    destroyed: u64,
}

impl PoolInner {
    fn create_session(&mut self) -> SessionId {
        let session = Session::new();
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        self.created += 1;
        id
    }

    fn destroy_session(&mut self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            self.destroyed += 1;
        }
    }

    fn mark_leased(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.state = SessionState::Leased;
            session.last_used_at = Instant::now();
        }
    }

    fn outstanding(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.state != SessionState::Idle)
            .map(|session| session.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.sessions.len(),
            idle: self.idle.len(),
            leased: self.sessions.len() - self.idle.len(),
            waiters: self.waiters,
            created: self.created,
            destroyed: self.destroyed,
            closed: self.closed,
        }
    }
}

#[derive(Debug)]
struct PoolShared {
    options: SessionPoolOptions,
    inner: Mutex<PoolInner>,
    available: Condvar,
    notify: Notify,
}

impl PoolShared {
    fn wake(&self) {
        self.available.notify_all();
        self.notify.notify_waiters();
    }

    /// Hands out an idle session, growing the pool when none is idle.
    /// `None` means the pool is at `max_sessions` with everything leased.
    fn try_lease(&self, inner: &mut PoolInner) -> Result<Option<SessionId>, PoolError> {
        if inner.closed {
            return Err(PoolError::Closed);
        }
        if let Some(id) = inner.idle.pop_front() {
            inner.mark_leased(&id);
            debug!(target: "session_pool", session = %id, "session leased");
            return Ok(Some(id));
        }
        let total = inner.sessions.len();
        if total >= self.options.max_sessions {
            return Ok(None);
        }
        let grow = self.options.inc_step.min(self.options.max_sessions - total);
        let id = inner.create_session();
        inner.mark_leased(&id);
        for _ in 1..grow {
            let extra = inner.create_session();
            inner.idle.push_back(extra);
        }
        debug!(
            target: "session_pool",
            grow,
            total = inner.sessions.len(),
            max = self.options.max_sessions,
            session = %id,
            "session pool grown"
        );
        Ok(Some(id))
    }

    fn release(&self, id: &SessionId) {
        let mut inner = self.inner.lock();
        let closed = inner.closed;
        let invalid = match inner.sessions.get_mut(id) {
            Some(session) if session.state == SessionState::Invalid => true,
            Some(session) => {
                if !closed {
                    session.state = SessionState::Idle;
                    session.last_used_at = Instant::now();
                }
                false
            }
            // Already discarded by `close`.
            None => return,
        };
        if closed {
            inner.destroy_session(id);
            debug!(target: "session_pool", session = %id, "session discarded after close");
        } else if invalid {
            inner.destroy_session(id);
            let mut replenished = 0;
            while inner.sessions.len() < self.options.min_sessions {
                let fresh = inner.create_session();
                inner.idle.push_back(fresh);
                replenished += 1;
            }
            debug!(
                target: "session_pool",
                session = %id,
                replenished,
                "invalid session dropped"
            );
        } else {
            inner.idle.push_front(id.clone());
            debug!(target: "session_pool", session = %id, "session released");
        }
        drop(inner);
        self.wake();
    }

    fn mark_invalid(&self, id: &SessionId) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(id) {
            session.state = SessionState::Invalid;
        }
    }

    fn exhausted(&self, waited: Duration) -> PoolError {
        PoolError::Exhausted {
            waited,
            max_sessions: self.options.max_sessions,
        }
    }

    /// Returns `false` when the pool was already closed.
    fn begin_close(&self, inner: &mut MutexGuard<'_, PoolInner>) -> bool {
        if inner.closed {
            return false;
        }
        inner.closed = true;
        let idle: Vec<SessionId> = inner.idle.drain(..).collect();
        for id in &idle {
            inner.destroy_session(id);
        }
        info!(
            target: "session_pool",
            discarded = idle.len(),
            outstanding = inner.sessions.len(),
            "closing session pool"
        );
        true
    }

    fn finish_close(&self, inner: &mut MutexGuard<'_, PoolInner>) -> Result<(), PoolError> {
        let leaked = inner.outstanding();
        for id in &leaked {
            inner.destroy_session(id);
        }
        if leaked.is_empty() {
            return Ok(());
        }
        if self.options.fail_on_session_leak {
            warn!(
                target: "session_pool",
                leaked = leaked.len(),
                "session pool closed with outstanding leases"
            );
            return Err(PoolError::SessionLeak { ids: leaked });
        }
        debug!(
            target: "session_pool",
            discarded = leaked.len(),
            "outstanding leases discarded at close"
        );
        Ok(())
    }
}

struct WaiterGuard<'a> {
    shared: &'a PoolShared,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.shared.inner.lock().waiters -= 1;
    }
}

/// Bounded pool of backend sessions.
///
/// Cloning is cheap and yields a handle to the same pool. Every mutation of
/// the session set goes through one mutex, so two callers are never handed
/// the same idle session.
#[derive(Clone, Debug)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    /// Validates `options` and pre-creates `min_sessions` idle sessions.
    pub fn new(options: SessionPoolOptions) -> Result<Self, PoolError> {
        options.validate()?;
        let mut inner = PoolInner::default();
        for _ in 0..options.min_sessions {
            let id = inner.create_session();
            inner.idle.push_back(id);
        }
        debug!(
            target: "session_pool",
            min = options.min_sessions,
            max = options.max_sessions,
            inc_step = options.inc_step,
            "session pool created"
        );
        Ok(Self {
            shared: Arc::new(PoolShared {
                options,
                inner: Mutex::new(inner),
                available: Condvar::new(),
                notify: Notify::new(),
            }),
        })
    }

    pub fn options(&self) -> &SessionPoolOptions {
        &self.shared.options
    }

    /// Blocks the calling thread until a session is available.
    pub fn acquire(&self) -> Result<PooledSession, PoolError> {
        let started = Instant::now();
        let deadline = started + self.shared.options.acquire_timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(id) = self.shared.try_lease(&mut inner)? {
                let wake_others = inner.waiters > 0 && !inner.idle.is_empty();
                drop(inner);
                if wake_others {
                    self.shared.wake();
                }
                return Ok(self.lease(id));
            }
            if Instant::now() >= deadline {
                return Err(self.shared.exhausted(started.elapsed()));
            }
            inner.waiters += 1;
            self.shared.available.wait_until(&mut inner, deadline);
            inner.waiters -= 1;
        }
    }

    /// Suspends the calling task until a session is available. Dropping the
    /// returned future while it waits leaves the pool untouched.
    pub async fn acquire_async(&self) -> Result<PooledSession, PoolError> {
        let started = tokio::time::Instant::now();
        let deadline = started + self.shared.options.acquire_timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let waiter = {
                let mut inner = self.shared.inner.lock();
                if let Some(id) = self.shared.try_lease(&mut inner)? {
                    let wake_others = inner.waiters > 0 && !inner.idle.is_empty();
                    drop(inner);
                    if wake_others {
                        self.shared.wake();
                    }
                    return Ok(self.lease(id));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(self.shared.exhausted(started.elapsed()));
                }
                inner.waiters += 1;
                WaiterGuard {
                    shared: &self.shared,
                }
            };
            let _ = tokio::time::timeout_at(deadline, notified).await;
            drop(waiter);
        }
    }

    pub fn release(&self, session: PooledSession) {
        session.release();
    }

    /// Stops handing out sessions and waits up to the grace period for
    /// outstanding leases. Leftover leases are discarded and, with
    /// `fail_on_session_leak`, reported as [`PoolError::SessionLeak`].
    pub fn close(&self) -> Result<(), PoolError> {
        let deadline = Instant::now() + self.shared.options.close_grace_period;
        let mut inner = self.shared.inner.lock();
        if !self.shared.begin_close(&mut inner) {
            return Ok(());
        }
        self.shared.wake();
        while !inner.outstanding().is_empty() {
            if self
                .shared
                .available
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                break;
            }
        }
        self.shared.finish_close(&mut inner)
    }

    pub async fn close_async(&self) -> Result<(), PoolError> {
        let deadline = tokio::time::Instant::now() + self.shared.options.close_grace_period;
        {
            let mut inner = self.shared.inner.lock();
            if !self.shared.begin_close(&mut inner) {
                return Ok(());
            }
        }
        self.shared.wake();
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let drained = self.shared.inner.lock().outstanding().is_empty();
            if drained {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }
        let mut inner = self.shared.inner.lock();
        self.shared.finish_close(&mut inner)
    }

    /// Destroys idle sessions unused for at least `idle_for`, never going
    /// below `min_sessions`. Returns how many were destroyed.
    pub fn shrink_idle(&self, idle_for: Duration) -> usize {
        let mut inner = self.shared.inner.lock();
        let mut removed = 0;
        while inner.sessions.len() > self.shared.options.min_sessions {
            let Some(oldest) = inner.idle.back().cloned() else {
                break;
            };
            let stale = inner
                .sessions
                .get(&oldest)
                .map(|session| session.last_used_at.elapsed() >= idle_for)
                .unwrap_or(true);
            if !stale {
                break;
            }
            inner.idle.pop_back();
            inner.destroy_session(&oldest);
            removed += 1;
        }
        if removed > 0 {
            debug!(target: "session_pool", removed, "idle sessions shrunk");
        }
        removed
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.inner.lock().stats()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.shared.inner.lock().sessions.values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    fn lease(&self, id: SessionId) -> PooledSession {
        PooledSession {
            shared: Arc::clone(&self.shared),
            id,
            released: false,
        }
    }
}

/// Exclusive lease over one pooled session. The session goes back to the
/// pool exactly once: on [`PooledSession::release`] or on drop.
#[derive(Debug)]
pub struct PooledSession {
    shared: Arc<PoolShared>,
    id: SessionId,
    released: bool,
}

impl PooledSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Flags the session as unusable; it is destroyed instead of reused when
    /// the lease ends.
    pub fn mark_invalid(&self) {
        self.shared.mark_invalid(&self.id);
    }

    pub fn release(mut self) {
        self.release_once();
    }

    /// Drops the current (invalid) session and leases a fresh one in its place.
    pub fn renew(&mut self) -> Result<(), PoolError> {
        self.mark_invalid();
        self.release_once();
        let fresh = self.pool().acquire()?;
        self.adopt(fresh);
        Ok(())
    }

    pub async fn renew_async(&mut self) -> Result<(), PoolError> {
        self.mark_invalid();
        self.release_once();
        let fresh = self.pool().acquire_async().await?;
        self.adopt(fresh);
        Ok(())
    }

    fn pool(&self) -> SessionPool {
        SessionPool {
            shared: Arc::clone(&self.shared),
        }
    }

    fn adopt(&mut self, mut fresh: PooledSession) {
        fresh.released = true;
        self.id = fresh.id.clone();
        self.released = false;
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.release(&self.id);
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.release_once();
    }
}
