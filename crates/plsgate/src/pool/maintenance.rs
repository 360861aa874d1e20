//! Once-a-second eviction and health checking.
//!
//! Decisions are made in [`plan_tick`] under the pool lock and never touch
//! the network. The resulting closes, probes and interrupts run on blocking
//! workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use super::SessionId;
use super::session_pool::{PoolInner, PoolState, close_session};
use super::state::SessionStatus;
use crate::db::{Breaker, Session};

const TICK: Duration = Duration::from_secs(1);

pub(super) enum TickAction {
    Close { id: SessionId, session: Box<dyn Session> },
    Probe { id: SessionId, session: Box<dyn Session> },
    Interrupt { id: SessionId, breaker: Arc<dyn Breaker> },
}

pub(super) async fn run(inner: Arc<PoolInner>) {
    let cancel = inner.cancel.clone();
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let actions = {
                    let mut state = inner.lock();
                    if state.closed {
                        None
                    } else {
                        Some(plan_tick(
                            &mut state,
                            inner.config.min_sessions,
                            inner.config.test_interval(),
                            Instant::now(),
                        ))
                    }
                };
                match actions {
                    Some(actions) => dispatch(&inner, actions),
                    None => break,
                }
            }
        }
    }
    tracing::debug!("Pool maintenance stopped");
}

/// Advance every countdown by one tick and decide what to evict or probe.
pub(super) fn plan_tick(
    state: &mut PoolState,
    min_sessions: usize,
    test_interval: Duration,
    now: Instant,
) -> Vec<TickAction> {
    let mut actions = Vec::new();
    for entry in &mut state.entries {
        entry.countdown -= 1;
    }

    // Leaked leases and hung connects. A busy session has its call broken
    // so the holder gets an error; whoever holds the session closes it once
    // they find the entry gone.
    let mut kept = Vec::with_capacity(state.entries.len());
    for mut entry in state.entries.drain(..) {
        if !(entry.status.is_leased() && entry.countdown <= 0) {
            kept.push(entry);
            continue;
        }
        tracing::warn!(session = %entry.id, status = %entry.status, "Evicting session held past its timeout");
        if let Some(breaker) = entry.breaker.take() {
            actions.push(TickAction::Interrupt {
                id: entry.id,
                breaker,
            });
        }
    }
    state.entries = kept;

    let expired = state
        .entries
        .iter()
        .filter(|e| e.status.is_idle() && e.countdown <= 0)
        .count();
    let mut evict = expired.min(state.entries.len().saturating_sub(min_sessions));
    if evict > 0 {
        let mut kept = Vec::with_capacity(state.entries.len());
        for mut entry in state.entries.drain(..) {
            if evict > 0 && entry.status.is_idle() && entry.countdown <= 0 {
                evict -= 1;
                tracing::info!(session = %entry.id, "Evicting idle session");
                // A session under test is closed by its prober.
                if let Some(session) = entry.handle.take() {
                    actions.push(TickAction::Close {
                        id: entry.id,
                        session,
                    });
                }
                continue;
            }
            kept.push(entry);
        }
        state.entries = kept;
    }

    for entry in &mut state.entries {
        if entry.status != SessionStatus::Free {
            continue;
        }
        let due = entry
            .tested_at
            .is_none_or(|at| now.saturating_duration_since(at) > test_interval);
        if due && let Some(session) = entry.handle.take() {
            entry.set_status(SessionStatus::Test);
            actions.push(TickAction::Probe {
                id: entry.id,
                session,
            });
        }
    }
    actions
}

fn dispatch(inner: &Arc<PoolInner>, actions: Vec<TickAction>) {
    for action in actions {
        match action {
            // No I/O permit: the calls being broken may be the ones holding them.
            TickAction::Interrupt { id, breaker } => {
                tokio::task::spawn_blocking(move || interrupt(id, breaker.as_ref()));
            }
            TickAction::Close { id, session } => {
                spawn_worker(inner, move |_| close_session(id, session, "idle timeout"));
            }
            TickAction::Probe { id, mut session } => {
                spawn_worker(inner, move |worker| {
                    let probe = session.ping(worker.config.test_timeout());
                    worker.settle_probe(id, session, probe, false);
                });
            }
        }
    }
}

fn spawn_worker<F>(inner: &Arc<PoolInner>, job: F)
where
    F: FnOnce(&PoolInner) + Send + 'static,
{
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let _permit = Arc::clone(&inner.io_permits).acquire_owned().await.ok();
        let worker = Arc::clone(&inner);
        if let Err(e) = tokio::task::spawn_blocking(move || job(&worker)).await {
            tracing::error!(error = %e, "Pool maintenance worker failed");
        }
    });
}

fn interrupt(id: SessionId, breaker: &dyn Breaker) {
    match breaker.break_execution() {
        Ok(()) => tracing::info!(session = %id, "Interrupted call on expired session"),
        Err(e) => tracing::warn!(session = %id, error = %e, "Failed to interrupt expired session"),
    }
}
