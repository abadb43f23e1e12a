use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::store::{ActivityLogEntry, LiveState, LiveStateSnapshot, Role};

/// Top-level session state machine.
///
/// ```text
/// LOGGED_OUT ──(login)──▶ DASHBOARD ──(logout)──▶ torn down
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    LoggedOut,
    Dashboard,
}

/// The authenticated operator behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PressureSample {
    pub at: DateTime<Utc>,
    pub bar: f64,
}

/// Mutable per-session fields.
#[derive(Debug)]
pub struct SessionContext {
    pub phase: SessionPhase,
    pub principal: Option<Principal>,
    /// Last known good live state; defaults until the first successful read.
    pub fallback: LiveState,
    pub has_synced: bool,
    pub online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub recent_activity: Vec<ActivityLogEntry>,
    pub pressure_history: VecDeque<PressureSample>,
    pub cycles: u64,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            phase: SessionPhase::LoggedOut,
            principal: None,
            fallback: LiveState::default(),
            has_synced: false,
            online: false,
            last_sync_at: None,
            recent_activity: Vec::new(),
            pressure_history: VecDeque::new(),
            cycles: 0,
        }
    }
}

impl SessionContext {
    /// Move to `DASHBOARD`. Returns `false` if the session is already there.
    pub fn login(&mut self, principal: Principal) -> bool {
        if self.phase == SessionPhase::Dashboard {
            return false;
        }
        self.phase = SessionPhase::Dashboard;
        self.principal = Some(principal);
        true
    }

    pub fn logout(&mut self) {
        self.phase = SessionPhase::LoggedOut;
        self.principal = None;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Dashboard && self.principal.is_some()
    }

    /// Fold a successful read into the fallback copy without sampling pressure.
    pub fn merge_snapshot(&mut self, snapshot: &LiveStateSnapshot, now: DateTime<Utc>) {
        self.fallback.merge(snapshot);
        self.has_synced = true;
        self.online = true;
        self.last_sync_at = Some(now);
    }

    /// Fold a poll cycle's read into the fallback copy and sample its pressure.
    pub fn record_sync(
        &mut self,
        snapshot: &LiveStateSnapshot,
        now: DateTime<Utc>,
        history_len: usize,
    ) {
        self.merge_snapshot(snapshot, now);

        if history_len == 0 {
            return;
        }
        if let Some(bar) = snapshot.live_pressure {
            self.pressure_history.push_back(PressureSample { at: now, bar });
            while self.pressure_history.len() > history_len {
                self.pressure_history.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Principal {
        Principal {
            username: "admin".into(),
            role: Role::SuperAdmin,
        }
    }

    #[test]
    fn login_happens_once() {
        let mut ctx = SessionContext::default();
        assert!(ctx.login(admin()));
        assert!(!ctx.login(admin()));
        assert!(ctx.is_authenticated());
        ctx.logout();
        assert_eq!(ctx.phase, SessionPhase::LoggedOut);
        assert!(ctx.principal.is_none());
    }

    #[test]
    fn pressure_history_is_bounded() {
        let mut ctx = SessionContext::default();
        for i in 0..5 {
            let snap = LiveStateSnapshot {
                live_pressure: Some(f64::from(i)),
                ..LiveStateSnapshot::default()
            };
            ctx.record_sync(&snap, Utc::now(), 3);
        }
        let bars: Vec<f64> = ctx.pressure_history.iter().map(|s| s.bar).collect();
        assert_eq!(bars, [2.0, 3.0, 4.0]);
    }

    #[test]
    fn merge_alone_takes_no_sample() {
        let mut ctx = SessionContext::default();
        let snap = LiveStateSnapshot {
            live_pressure: Some(2.5),
            ..LiveStateSnapshot::default()
        };
        ctx.merge_snapshot(&snap, Utc::now());
        assert!(ctx.online);
        assert!((ctx.fallback.live_pressure - 2.5).abs() < f64::EPSILON);
        assert!(ctx.pressure_history.is_empty());
    }

    #[test]
    fn sync_without_pressure_adds_no_sample() {
        let mut ctx = SessionContext::default();
        ctx.record_sync(&LiveStateSnapshot::default(), Utc::now(), 3);
        assert!(ctx.has_synced);
        assert!(ctx.pressure_history.is_empty());
        assert!(ctx.fallback.auto_mode);
    }
}
