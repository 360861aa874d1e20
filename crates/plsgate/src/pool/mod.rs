//! Bounded, self-healing pool of database sessions.
//!
//! All entries live behind one lock. Connecting, probing, rolling back and
//! closing happen on a session moved out of its entry while the lock is
//! released; completions re-enter the lock only to update state.

mod lease;
mod maintenance;
mod session_pool;
mod state;

use std::fmt;
use std::time::Duration;

pub use lease::SessionLease;
pub use session_pool::SessionPool;
pub use state::SessionStatus;

use crate::db::DbError;

/// Identity of a pool entry, stable for the life of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("failed to open database session: {0}")]
    Connection(#[source] DbError),
    #[error("no free database session (pool at capacity of {max})")]
    Exhausted { max: usize },
    #[error("session pool is shut down")]
    Closed,
    #[error("session pool requires a tokio runtime")]
    NoRuntime,
}

/// Counts per state, for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub free: usize,
    pub busy: usize,
    pub testing: usize,
    pub initializing: usize,
    pub max: usize,
}

/// Outcome of [`SessionPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Closers that finished inside the budget, successfully or not.
    pub closed: usize,
    /// Closers abandoned when the budget ran out.
    pub outstanding: usize,
    pub waited: Duration,
}
