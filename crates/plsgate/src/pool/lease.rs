//! Exclusive handle to a BUSY session.

use std::sync::Arc;

use super::SessionId;
use super::session_pool::PoolInner;
use crate::db::Session;

/// A session checked out of the pool.
///
/// Give it back with [`SessionPool::release`](super::SessionPool::release).
/// Dropping a lease still releases the session, but logs it as a bug.
pub struct SessionLease {
    id: SessionId,
    session: Option<Box<dyn Session>>,
    pool: Arc<PoolInner>,
}

impl SessionLease {
    pub(crate) fn new(id: SessionId, session: Box<dyn Session>, pool: Arc<PoolInner>) -> Self {
        Self {
            id,
            session: Some(session),
            pool,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session
            .as_deref_mut()
            .expect("lease holds its session until released")
    }

    pub(crate) fn into_parts(mut self) -> (SessionId, Box<dyn Session>, Arc<PoolInner>) {
        let session = self
            .session
            .take()
            .expect("lease holds its session until released");
        (self.id, session, Arc::clone(&self.pool))
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease").field("id", &self.id).finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::error!(session = %self.id, "SessionLease dropped without release");
            self.pool.dispatch_release(self.id, session);
        }
    }
}
