use std::time::{Duration, Instant};

use vellum_core_types::SessionId;

use crate::error::PoolError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Leased,
    /// Reported unusable by the backend; dropped when its lease ends.
    Invalid,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl Session {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            created_at: now,
            last_used_at: now,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct SessionPoolOptions {
    pub min_sessions: usize,
    pub max_sessions: usize,
    pub inc_step: usize,
    pub fail_on_session_leak: bool,
    /// How long `acquire` waits for a release once the pool is at `max_sessions`.
    pub acquire_timeout: Duration,
    /// How long `close` waits for outstanding leases before declaring them leaked.
    pub close_grace_period: Duration,
}

impl Default for SessionPoolOptions {
    fn default() -> Self {
        Self {
            min_sessions: 100,
            max_sessions: 400,
            inc_step: 25,
            fail_on_session_leak: false,
            acquire_timeout: Duration::from_secs(60),
            close_grace_period: Duration::ZERO,
        }
    }
}

impl SessionPoolOptions {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_sessions == 0 {
            return Err(PoolError::InvalidOptions(
                "max_sessions must be at least 1".into(),
            ));
        }
        if self.min_sessions > self.max_sessions {
            return Err(PoolError::InvalidOptions(format!(
                "min_sessions ({}) exceeds max_sessions ({})",
                self.min_sessions, self.max_sessions
            )));
        }
        if self.inc_step == 0 {
            return Err(PoolError::InvalidOptions(
                "inc_step must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub waiters: usize,
    pub created: u64,
    pub destroyed: u64,
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(SessionPoolOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_bounds_and_zero_step() {
        let inverted = SessionPoolOptions {
            min_sessions: 5,
            max_sessions: 2,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(PoolError::InvalidOptions(_))
        ));

        let zero_step = SessionPoolOptions {
            inc_step: 0,
            ..Default::default()
        };
        assert!(zero_step.validate().is_err());

        let zero_max = SessionPoolOptions {
            min_sessions: 0,
            max_sessions: 0,
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());
    }
}
