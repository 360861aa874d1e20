//! Database seam.
//!
//! Everything above this module talks to the database through [`Session`]
//! and [`Connector`]. Both are blocking: callers run them on a blocking
//! thread (`spawn_blocking`) and never while holding the pool lock.

#[cfg(feature = "oracle")]
pub mod oracle;
pub mod statements;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Backend-neutral database error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
    pub code: Option<i32>,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Handle to a session-scoped temporary CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LobId(pub u64);

impl fmt::Display for LobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lob#{}", self.0)
    }
}

/// A value bound to a positional placeholder (`:1`, `:2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Text(String),
    Integer(i64),
    Clob(LobId),
}

/// Result of catalog name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub owner: String,
    pub package: Option<String>,
    pub procedure: String,
}

/// One row of the argument catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentRow {
    pub argument_name: Option<String>,
    pub overload: Option<u32>,
    pub data_type: Option<String>,
    pub type_owner: Option<String>,
    pub type_name: Option<String>,
    pub type_subname: Option<String>,
}

/// One round trip of the page fetch protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    pub text: Option<String>,
    pub lines: u32,
}

/// A live database session.
pub trait Session: Send {
    /// Run an anonymous block with positional binds.
    fn execute_block(&mut self, sql: &str, binds: &[BindValue]) -> DbResult<()>;

    /// Map a possibly package-qualified name to owner/package/procedure.
    fn resolve_name(&mut self, name: &str) -> DbResult<ResolvedName>;

    /// Argument catalog rows for a resolved procedure, ordered by overload.
    fn argument_rows(&mut self, name: &ResolvedName) -> DbResult<Vec<ArgumentRow>>;

    /// Fetch up to `max_lines` lines of generated output.
    fn fetch_page(&mut self, max_lines: u32) -> DbResult<PageChunk>;

    fn create_temp_clob(&mut self, content: &str) -> DbResult<LobId>;

    fn free_temp_clob(&mut self, lob: LobId) -> DbResult<()>;

    /// Liveness probe bounded by `timeout`.
    fn ping(&mut self, timeout: Duration) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;

    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()>;

    /// Handle that can interrupt a call running on this session from
    /// another thread.
    fn breaker(&self) -> Arc<dyn Breaker>;

    fn close(self: Box<Self>) -> DbResult<()>;
}

/// Interrupts whatever call is in flight on the session it came from.
///
/// The interrupted call fails; the session stays open and must still be
/// closed by its holder.
pub trait Breaker: Send + Sync {
    fn break_execution(&self) -> DbResult<()>;
}

/// Opens new sessions for the pool.
pub trait Connector: Send + Sync {
    fn connect(&self) -> DbResult<Box<dyn Session>>;
}
