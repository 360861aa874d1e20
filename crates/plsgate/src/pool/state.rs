//! Per-session lifecycle states and the legal transitions between them.

use std::fmt;

/// Lifecycle state of a pooled session.
///
/// ```text
///   Init ──connect ok──▶ Busy ◀──acquire── Free ◀──probe ok── Test
///                         │                 ▲  │                ▲
///                         └────release──────┘  └──due for test──┘
/// ```
///
/// Removal is not a state: expired or failed entries leave the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Provisional entry reserving capacity while connecting.
    Init,
    Free,
    Busy,
    /// Handed to a worker for a liveness probe.
    Test,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Init,
        SessionStatus::Free,
        SessionStatus::Busy,
        SessionStatus::Test,
    ];

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Init, Busy) | (Free, Busy) | (Free, Test) | (Busy, Free) | (Test, Free)
        )
    }

    /// Eligible for idle eviction.
    pub fn is_idle(self) -> bool {
        matches!(self, SessionStatus::Free | SessionStatus::Test)
    }

    /// Held outside the pool (by a request or a connecting thread).
    pub fn is_leased(self) -> bool {
        matches!(self, SessionStatus::Init | SessionStatus::Busy)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Init => "init",
            SessionStatus::Free => "free",
            SessionStatus::Busy => "busy",
            SessionStatus::Test => "test",
        };
        f.write_str(s)
    }
}
