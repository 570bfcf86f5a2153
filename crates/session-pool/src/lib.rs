pub mod error;
pub mod model;
pub mod pool;

pub use error::PoolError;
pub use model::{PoolStats, Session, SessionPoolOptions, SessionState};
pub use pool::{PooledSession, SessionPool};
