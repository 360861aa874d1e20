//! The pool proper: acquire, asynchronous release, shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lease::SessionLease;
use super::maintenance;
use super::state::SessionStatus;
use super::{PoolError, PoolSnapshot, SessionId, ShutdownReport};
use crate::config::PoolConfig;
use crate::db::{Breaker, Connector, DbError, Session};

/// One entry of the pool.
///
/// `handle` is `Some` exactly while the entry is `Free`; in every other
/// state the session is owned by whoever is working on it. `breaker` is
/// set while the entry is `Busy`.
pub(super) struct PooledSession {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Ticks left before the current state expires.
    pub countdown: i64,
    pub tested_at: Option<Instant>,
    pub handle: Option<Box<dyn Session>>,
    pub breaker: Option<Arc<dyn Breaker>>,
}

impl PooledSession {
    pub fn provisional(id: SessionId, countdown: i64) -> Self {
        Self {
            id,
            status: SessionStatus::Init,
            countdown,
            tested_at: None,
            handle: None,
            breaker: None,
        }
    }

    pub fn set_status(&mut self, next: SessionStatus) {
        if !self.status.can_transition_to(next) {
            debug_assert!(false, "illegal transition {} -> {}", self.status, next);
            tracing::error!(session = %self.id, from = %self.status, to = %next, "Illegal session state transition");
        }
        self.status = next;
    }
}

#[derive(Default)]
pub(super) struct PoolState {
    pub entries: Vec<PooledSession>,
    pub closed: bool,
}

impl PoolState {
    pub fn find_mut(&mut self, id: SessionId) -> Option<&mut PooledSession> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<PooledSession> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    pub fn snapshot(&self, max: usize) -> PoolSnapshot {
        let mut snapshot = PoolSnapshot {
            total: self.entries.len(),
            max,
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.status {
                SessionStatus::Init => snapshot.initializing += 1,
                SessionStatus::Free => snapshot.free += 1,
                SessionStatus::Busy => snapshot.busy += 1,
                SessionStatus::Test => snapshot.testing += 1,
            }
        }
        snapshot
    }
}

pub(crate) struct PoolInner {
    pub(super) config: PoolConfig,
    connector: Arc<dyn Connector>,
    state: StdMutex<PoolState>,
    next_id: AtomicU64,
    /// Bounds concurrent release/probe/close work.
    pub(super) io_permits: Arc<Semaphore>,
    pub(super) runtime: Handle,
    pub(super) cancel: CancellationToken,
}

impl PoolInner {
    pub(super) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Hand a returned session to a worker. Never blocks the caller.
    pub(crate) fn dispatch_release(
        self: &Arc<Self>,
        id: SessionId,
        session: Box<dyn Session>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let _permit = Arc::clone(&inner.io_permits).acquire_owned().await.ok();
            let worker = Arc::clone(&inner);
            if let Err(e) =
                tokio::task::spawn_blocking(move || worker.finish_release(id, session)).await
            {
                tracing::error!(session = %id, error = %e, "Release worker failed");
            }
        })
    }

    fn finish_release(&self, id: SessionId, mut session: Box<dyn Session>) {
        if self.config.rollback_on_release
            && let Err(e) = session.rollback()
        {
            tracing::warn!(session = %id, error = %e, "Rollback on release failed");
        }
        if let Err(e) = session.set_autocommit(false) {
            tracing::warn!(session = %id, error = %e, "Failed to reset autocommit on release");
        }

        {
            let mut state = self.lock();
            let Some(entry) = state.find_mut(id) else {
                drop(state);
                close_session(id, session, "released session is no longer pooled");
                return;
            };
            entry.countdown = self.config.idle_timeout_secs;
            entry.breaker = None;
            if !self.config.test_on_release {
                entry.set_status(SessionStatus::Free);
                entry.handle = Some(session);
                tracing::debug!(session = %id, "Session returned to pool");
                return;
            }
        }

        let probe = session.ping(self.config.test_timeout());
        self.settle_probe(id, session, probe, true);
    }

    /// Apply the outcome of a liveness probe taken outside the lock.
    pub(super) fn settle_probe(
        &self,
        id: SessionId,
        session: Box<dyn Session>,
        probe: Result<(), DbError>,
        reset_countdown: bool,
    ) {
        let mut state = self.lock();
        if let Err(e) = probe {
            state.remove(id);
            drop(state);
            tracing::warn!(session = %id, error = %e, "Liveness probe failed, discarding session");
            close_session(id, session, "failed liveness probe");
            return;
        }
        match state.find_mut(id) {
            Some(entry) => {
                entry.set_status(SessionStatus::Free);
                entry.handle = Some(session);
                entry.breaker = None;
                entry.tested_at = Some(Instant::now());
                if reset_countdown {
                    entry.countdown = self.config.idle_timeout_secs;
                }
                tracing::debug!(session = %id, "Session tested and free");
            }
            None => {
                drop(state);
                close_session(id, session, "tested session is no longer pooled");
            }
        }
    }
}

/// Close a session, logging instead of propagating failure.
pub(super) fn close_session(id: SessionId, session: Box<dyn Session>, reason: &str) {
    match session.close() {
        Ok(()) => tracing::info!(session = %id, reason, "Closed database session"),
        Err(e) => tracing::warn!(session = %id, reason, error = %e, "Failed to close database session"),
    }
}

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Create the pool and start its maintenance task on the current runtime.
    pub fn start(config: PoolConfig, connector: Arc<dyn Connector>) -> Result<Self, PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let inner = Arc::new(PoolInner {
            io_permits: Arc::new(Semaphore::new(config.io_workers.max(1))),
            config,
            connector,
            state: StdMutex::new(PoolState::default()),
            next_id: AtomicU64::new(0),
            runtime: runtime.clone(),
            cancel: CancellationToken::new(),
        });

        runtime.spawn(maintenance::run(Arc::clone(&inner)));
        tracing::info!(
            min_sessions = inner.config.min_sessions,
            max_sessions = inner.config.max_sessions,
            "Session pool started"
        );
        Ok(Self { inner })
    }

    /// Check out a session, connecting a new one if there is room.
    ///
    /// Blocking: a cache miss connects on the calling thread. Fails fast
    /// with [`PoolError::Exhausted`] when every slot is taken.
    pub fn acquire(&self) -> Result<SessionLease, PoolError> {
        let config = &self.inner.config;
        let id = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.status == SessionStatus::Free && e.handle.is_some())
                && let Some(session) = entry.handle.take()
            {
                entry.set_status(SessionStatus::Busy);
                entry.countdown = config.busy_timeout_secs;
                entry.breaker = Some(session.breaker());
                tracing::debug!(session = %entry.id, "Reusing pooled session");
                return Ok(SessionLease::new(entry.id, session, Arc::clone(&self.inner)));
            }
            if state.entries.len() >= config.max_sessions {
                tracing::warn!(max_sessions = config.max_sessions, "Session pool exhausted");
                return Err(PoolError::Exhausted {
                    max: config.max_sessions,
                });
            }
            let id = self.inner.next_id();
            state
                .entries
                .push(PooledSession::provisional(id, config.busy_timeout_secs));
            id
        };

        let connected = self.inner.connector.connect().and_then(|mut session| {
            session.set_autocommit(false)?;
            Ok(session)
        });

        let mut state = self.inner.lock();
        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                state.remove(id);
                tracing::error!(session = %id, error = %e, code = ?e.code, "Failed to open database session");
                return Err(PoolError::Connection(e));
            }
        };
        match state.find_mut(id) {
            Some(entry) => {
                entry.set_status(SessionStatus::Busy);
                entry.countdown = config.busy_timeout_secs;
                entry.breaker = Some(session.breaker());
                // A fresh connection counts as tested.
                entry.tested_at = Some(Instant::now());
                tracing::info!(session = %id, "Opened database session");
                Ok(SessionLease::new(id, session, Arc::clone(&self.inner)))
            }
            None => {
                drop(state);
                close_session(id, session, "connect outlived its provisional entry");
                Err(PoolError::Connection(DbError::new(
                    "session was evicted while connecting",
                )))
            }
        }
    }

    /// Return a session. Validation runs on a worker; the returned handle
    /// only matters to callers that want to observe completion.
    pub fn release(&self, lease: SessionLease) -> JoinHandle<()> {
        let (id, session, inner) = lease.into_parts();
        inner.dispatch_release(id, session)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.lock().snapshot(self.inner.config.max_sessions)
    }

    /// Stop maintenance and close every pooled session within `budget`.
    ///
    /// Closers run on detached threads; any still running when the budget
    /// runs out are abandoned and counted as outstanding. Leased sessions
    /// are closed when their lease is released.
    pub async fn shutdown(&self, budget: Duration) -> ShutdownReport {
        self.inner.cancel.cancel();
        let drained: Vec<(SessionId, Box<dyn Session>)> = {
            let mut state = self.inner.lock();
            state.closed = true;
            state
                .entries
                .drain(..)
                .filter_map(|e| e.handle.map(|h| (e.id, h)))
                .collect()
        };
        tracing::info!(sessions = drained.len(), budget = ?budget, "Shutting down session pool");

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + budget;
        let mut closers = Vec::with_capacity(drained.len());
        for (id, session) in drained {
            let (tx, rx) = oneshot::channel();
            let spawned = std::thread::Builder::new()
                .name(format!("plsgate-close-{id}"))
                .spawn(move || {
                    let _ = tx.send(session.close());
                });
            match spawned {
                Ok(_) => closers.push((id, rx)),
                Err(e) => tracing::warn!(session = %id, error = %e, "Failed to spawn closer thread"),
            }
        }

        let mut closed = 0;
        let mut outstanding = 0;
        for (id, rx) in closers {
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(Ok(()))) => closed += 1,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(session = %id, error = %e, "Failed to close database session");
                    closed += 1;
                }
                Ok(Err(_)) => tracing::warn!(session = %id, "Closer thread exited without reporting"),
                Err(_) => {
                    tracing::warn!(session = %id, "Abandoning session close after shutdown budget");
                    outstanding += 1;
                }
            }
        }

        let report = ShutdownReport {
            closed,
            outstanding,
            waited: started.elapsed(),
        };
        tracing::info!(
            closed = report.closed,
            outstanding = report.outstanding,
            waited = ?report.waited,
            "Session pool shut down"
        );
        report
    }

    #[cfg(test)]
    pub(super) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}
