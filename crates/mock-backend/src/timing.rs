use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use vellum_core_types::Status;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BackendMethod {
    ExecuteSql,
    Commit,
    Rollback,
}

impl BackendMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendMethod::ExecuteSql => "execute_sql",
            BackendMethod::Commit => "commit",
            BackendMethod::Rollback => "rollback",
        }
    }
}

impl fmt::Display for BackendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency and failure injected into one [`BackendMethod`].
///
/// Every call waits `min_latency` plus a uniform extra in
/// `[0, random_latency)`. An error is returned once and then cleared,
/// unless the timing is sticky.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulatedExecutionTime {
    pub min_latency: Duration,
    pub random_latency: Duration,
    pub error: Option<Status>,
    pub sticky: bool,
}

impl SimulatedExecutionTime {
    pub fn latency(min_latency: Duration, random_latency: Duration) -> Self {
        Self {
            min_latency,
            random_latency,
            ..Self::default()
        }
    }

    pub fn of_error(error: Status) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn of_sticky_error(error: Status) -> Self {
        Self {
            error: Some(error),
            sticky: true,
            ..Self::default()
        }
    }

    pub(crate) fn sample_latency(&self, rng: &mut StdRng) -> Duration {
        let extra = if self.random_latency.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.random_latency.as_nanos().min(u64::MAX as u128) as u64;
            Duration::from_nanos(rng.gen_range(0..nanos))
        };
        self.min_latency + extra
    }

    /// Error for the current call; one-shot errors are consumed.
    pub(crate) fn take_error(&mut self) -> Option<Status> {
        if self.sticky {
            self.error.clone()
        } else {
            self.error.take()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn one_shot_error_is_consumed() {
        let mut timing = SimulatedExecutionTime::of_error(Status::internal("boom"));
        assert!(timing.take_error().is_some());
        assert!(timing.take_error().is_none());

        let mut sticky = SimulatedExecutionTime::of_sticky_error(Status::internal("boom"));
        assert!(sticky.take_error().is_some());
        assert!(sticky.take_error().is_some());
    }

    #[test]
    fn latency_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let timing =
            SimulatedExecutionTime::latency(Duration::from_millis(5), Duration::from_millis(10));
        for _ in 0..50 {
            let latency = timing.sample_latency(&mut rng);
            assert!(latency >= Duration::from_millis(5));
            assert!(latency < Duration::from_millis(15));
        }
    }
}
