//! Turns a session's merged live state into the view the dashboard displays.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::config::Config;
use crate::control::{CommandPolicy, ControlGates};
use crate::services::{activity, cache};
use crate::session::{Principal, PressureSample, Session};
use crate::store::{ActivityLogEntry, LiveState, Role, ScheduleEntry, ValveCommand};

/// Display-formatted telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Metrics {
    /// `x.xx BAR`
    pub pressure: String,
    /// `x.x <ROTATION_UNIT>`
    pub rotation: String,
    /// `<n> A`
    pub motor_load: String,
    /// Render time, `HH:MM:SS` in the display offset.
    pub clock: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardView {
    /// `false` when the last read failed and these are last known values.
    pub online: bool,
    pub username: String,
    pub role: Role,
    pub metrics: Metrics,
    pub live_pressure: f64,
    pub auto_mode: bool,
    pub emergency: bool,
    pub command: ValveCommand,
    pub last_command_time: Option<String>,
    pub schedule: Vec<ScheduleEntry>,
    pub controls: ControlGates,
    pub recent_activity: Vec<ActivityLogEntry>,
    pub pressure_history: Vec<PressureSample>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub cycle: u64,
    pub rendered_at: DateTime<Utc>,
}

#[must_use]
pub fn metrics(config: &Config, live: &LiveState, at: DateTime<Utc>) -> Metrics {
    Metrics {
        pressure: format!("{:.2} BAR", live.live_pressure),
        rotation: format!("{:.1} {}", live.valve_rotation, config.rotation_unit),
        motor_load: format!("{} A", live.motor_load),
        clock: activity::format_clock(config, at),
    }
}

/// Build a view from already-fetched parts. Pure.
#[must_use]
pub fn build(
    config: &Config,
    principal: &Principal,
    live: &LiveState,
    online: bool,
    at: DateTime<Utc>,
) -> DashboardView {
    DashboardView {
        online,
        username: principal.username.clone(),
        role: principal.role,
        metrics: metrics(config, live, at),
        live_pressure: live.live_pressure,
        auto_mode: live.auto_mode,
        emergency: live.emergency,
        command: live.command,
        last_command_time: live.last_command_time.clone(),
        schedule: live.schedule.clone(),
        controls: CommandPolicy::from_config(config).gates(principal, live),
        recent_activity: Vec::new(),
        pressure_history: Vec::new(),
        last_sync_at: None,
        cycle: 0,
        rendered_at: at,
    }
}

/// One full cycle for `session`: sync live state, read the activity log,
/// render, and publish to subscribers.
///
/// Never fails; store errors show up as `online = false` and stale fields.
pub async fn refresh_view(state: &AppState, session: &Session) -> Arc<DashboardView> {
    let outcome = cache::sync_session(state, session).await;

    let activity = match activity::recent(state, state.config.activity_log_limit).await {
        Ok(entries) => Some(entries),
        Err(e) => {
            tracing::debug!(session_id = %session.id, error = %e, "Activity read failed, keeping previous list");
            None
        }
    };

    let view = {
        let mut ctx = session.context.write().await;
        if let Some(entries) = activity {
            ctx.recent_activity = entries;
        }
        ctx.cycles = ctx.cycles.saturating_add(1);

        // A logged-out session still gets a view; it has no controls.
        let principal = ctx.principal.clone().unwrap_or_else(|| Principal {
            username: String::new(),
            role: Role::User,
        });
        let mut view = build(&state.config, &principal, &outcome.live, outcome.online, Utc::now());
        if ctx.principal.is_none() {
            view.controls = ControlGates {
                open: false,
                close: false,
                stop: false,
                auto_toggle: false,
                schedule: false,
            };
        }
        view.recent_activity.clone_from(&ctx.recent_activity);
        view.pressure_history = ctx.pressure_history.iter().cloned().collect();
        view.last_sync_at = ctx.last_sync_at;
        view.cycle = ctx.cycles;
        view
    };

    tracing::debug!(
        session_id = %session.id,
        cycle = view.cycle,
        online = view.online,
        "Dashboard rendered"
    );
    session.publish(view)
}
