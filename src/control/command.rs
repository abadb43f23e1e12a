use chrono::NaiveTime;
use serde::Serialize;
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

use crate::config::{Config, ControlRole};
use crate::session::Principal;
use crate::store::{LiveState, Role, ScheduleEntry, ValveCommand};

const MAX_SCHEDULE_ENTRIES: usize = 96;

/// An operator action against the live state.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open,
    Close,
    Stop,
    SetAutoMode(bool),
    ApplySchedule(Vec<ScheduleEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Open,
    Close,
    Stop,
    AutoMode,
    Schedule,
}

impl Command {
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Open => CommandKind::Open,
            Self::Close => CommandKind::Close,
            Self::Stop => CommandKind::Stop,
            Self::SetAutoMode(_) => CommandKind::AutoMode,
            Self::ApplySchedule(_) => CommandKind::Schedule,
        }
    }

    /// Keys this command writes into `valve_system`. Nothing else is touched.
    #[must_use]
    pub fn updates(&self, issued_at: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Self::Open | Self::Close => {
                let command = if matches!(self, Self::Open) {
                    ValveCommand::Open
                } else {
                    ValveCommand::Close
                };
                fields.insert("command".into(), json!(command.as_str()));
                fields.insert("last_cmd".into(), json!(issued_at));
            }
            Self::Stop => {
                fields.insert("command".into(), json!(ValveCommand::Stop.as_str()));
                fields.insert("emergency".into(), json!(true));
                fields.insert("last_cmd".into(), json!(issued_at));
            }
            Self::SetAutoMode(enabled) => {
                fields.insert("auto_mode".into(), json!(enabled));
            }
            Self::ApplySchedule(entries) => {
                fields.insert("schedule".into(), json!(entries));
            }
        }
        fields
    }

    /// Activity-log text for this command.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Open => "Opened valve".to_string(),
            Self::Close => "Closed valve".to_string(),
            Self::Stop => "EMERGENCY STOP".to_string(),
            Self::SetAutoMode(true) => "Mode: Auto".to_string(),
            Self::SetAutoMode(false) => "Mode: Manual".to_string(),
            Self::ApplySchedule(entries) => format!("Updated schedule ({} entries)", entries.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("manual OPEN/CLOSE is disabled while auto mode is on")]
    ModeConflict,

    #[error("this action requires the super_admin role")]
    Unauthorized,

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl Rejection {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModeConflict => "mode_conflict",
            Self::Unauthorized => "unauthorized",
            Self::InvalidSchedule(_) => "invalid_schedule",
        }
    }
}

/// Which controls the operator can use right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ControlGates {
    pub open: bool,
    pub close: bool,
    pub stop: bool,
    pub auto_toggle: bool,
    pub schedule: bool,
}

/// Server-side re-check of the mode and role rules the dashboard gates on.
#[derive(Debug, Clone, Copy)]
pub struct CommandPolicy {
    control_role: ControlRole,
}

impl CommandPolicy {
    #[must_use]
    pub fn new(control_role: ControlRole) -> Self {
        Self { control_role }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.control_role)
    }

    #[must_use]
    pub fn has_control(&self, principal: &Principal) -> bool {
        match self.control_role {
            ControlRole::AnyUser => true,
            ControlRole::SuperAdmin => principal.role == Role::SuperAdmin,
        }
    }

    /// Accept or reject `command` for `principal` given the current live state.
    ///
    /// STOP is always accepted.
    ///
    /// # Errors
    ///
    /// Returns the typed `Rejection`.
    pub fn check(
        &self,
        principal: &Principal,
        live: &LiveState,
        command: &Command,
    ) -> Result<(), Rejection> {
        if matches!(command, Command::Stop) {
            return Ok(());
        }
        if !self.has_control(principal) {
            return Err(Rejection::Unauthorized);
        }
        match command {
            Command::Open | Command::Close if live.auto_mode => Err(Rejection::ModeConflict),
            Command::ApplySchedule(entries) => validate_schedule(entries),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn gates(&self, principal: &Principal, live: &LiveState) -> ControlGates {
        let control = self.has_control(principal);
        ControlGates {
            open: control && !live.auto_mode,
            close: control && !live.auto_mode,
            stop: true,
            auto_toggle: control,
            schedule: control,
        }
    }
}

fn validate_schedule(entries: &[ScheduleEntry]) -> Result<(), Rejection> {
    if entries.len() > MAX_SCHEDULE_ENTRIES {
        return Err(Rejection::InvalidSchedule(format!(
            "at most {MAX_SCHEDULE_ENTRIES} entries allowed"
        )));
    }
    for (i, entry) in entries.iter().enumerate() {
        let well_formed = entry.start_time.len() == 5
            && NaiveTime::parse_from_str(&entry.start_time, "%H:%M").is_ok();
        if !well_formed {
            return Err(Rejection::InvalidSchedule(format!(
                "entry {i}: start_time '{}' is not HH:MM",
                entry.start_time
            )));
        }
        if !entry.target.is_finite() {
            return Err(Rejection::InvalidSchedule(format!(
                "entry {i}: target must be a finite number"
            )));
        }
    }
    Ok(())
}
