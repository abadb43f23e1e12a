//! Explicit per-operator session objects.
//!
//! A session is created on first contact, moves to `DASHBOARD` on a successful
//! login, owns the fallback copy of the live state and the background poller,
//! and is torn down on logout or once it has sat idle past the configured
//! timeout with no open view stream.

mod context;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::render::DashboardView;
use crate::sync::poller::PollerHandle;

pub use context::{Principal, PressureSample, SessionContext, SessionPhase};

pub type ViewReceiver = watch::Receiver<Option<Arc<DashboardView>>>;

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub context: RwLock<SessionContext>,
    views: watch::Sender<Option<Arc<DashboardView>>>,
    poller: Mutex<Option<PollerHandle>>,
    last_seen: Mutex<Instant>,
}

impl Session {
    fn new() -> Self {
        let (views, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            context: RwLock::new(SessionContext::default()),
            views,
            poller: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Note that the operator is still there.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// No request for `timeout` and nobody streaming the view.
    #[must_use]
    pub fn is_idle(&self, timeout: Duration, now: Instant) -> bool {
        if self.views.receiver_count() > 0 {
            return false;
        }
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_seen) >= timeout
    }

    pub async fn principal(&self) -> Option<Principal> {
        let ctx = self.context.read().await;
        if ctx.is_authenticated() {
            ctx.principal.clone()
        } else {
            None
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.context.read().await.phase
    }

    /// Make `view` the latest render and wake every subscriber.
    pub fn publish(&self, view: DashboardView) -> Arc<DashboardView> {
        let view = Arc::new(view);
        self.views.send_replace(Some(Arc::clone(&view)));
        view
    }

    #[must_use]
    pub fn latest_view(&self) -> Option<Arc<DashboardView>> {
        self.views.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> ViewReceiver {
        self.views.subscribe()
    }

    /// Install the session's poller, cancelling any previous one.
    pub fn attach_poller(&self, handle: PollerHandle) {
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Push the poller's next cycle a full interval out. Returns `false` if no
    /// poller is running.
    pub fn restart_poll_timer(&self) -> bool {
        match self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(handle) => {
                handle.restart_timer();
                true
            }
            None => false,
        }
    }

    pub fn stop_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel();
            tracing::debug!(session_id = %self.id, "Poller stopped");
        }
    }

    #[must_use]
    pub fn has_poller(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// All live sessions, keyed by their bearer id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id, Arc::clone(&session));
        tracing::debug!(session_id = %session.id, "Session created");
        session
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Tear a session down: stop its poller and forget it.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.stop_poller();
        tracing::debug!(session_id = %id, "Session removed");
        Some(session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session idle for at least `timeout`. Returns how many went.
    pub fn reap_idle(&self, timeout: Duration, now: Instant) -> usize {
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(timeout, now))
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in idle {
            // Re-check under the shard lock; a request may have touched it since.
            if let Some((_, session)) = self
                .sessions
                .remove_if(&id, |_, session| session.is_idle(timeout, now))
            {
                session.stop_poller();
                tracing::info!(session_id = %id, "Idle session expired");
                reaped += 1;
            }
        }
        reaped
    }

    /// Stop every poller and drop every session; used on process shutdown.
    pub fn shutdown(&self) {
        let count = self.sessions.len();
        for entry in &self.sessions {
            entry.value().stop_poller();
        }
        self.sessions.clear();
        tracing::info!(sessions = count, "All sessions stopped");
    }
}
