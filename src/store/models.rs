use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Command values the field device understands in `valve_system/command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValveCommand {
    Open,
    Close,
    Stop,
    #[default]
    Idle,
    /// Anything the device wrote that this service does not recognise.
    #[serde(other)]
    Unknown,
}

impl ValveCommand {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Stop => "STOP",
            Self::Idle => "IDLE",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Self::Open,
            "CLOSE" => Self::Close,
            "STOP" => Self::Stop,
            "IDLE" | "" => Self::Idle,
            _ => Self::Unknown,
        }
    }
}

/// One row of the time-based schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScheduleEntry {
    /// Local wall-clock time, `HH:MM`.
    #[serde(alias = "START_TIME")]
    pub start_time: String,
    /// Target pressure in bar.
    #[serde(alias = "TARGET")]
    pub target: f64,
}

/// The telemetry/control record as the dashboard last saw it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LiveState {
    pub live_pressure: f64,
    pub valve_rotation: f64,
    pub motor_load: f64,
    pub auto_mode: bool,
    pub command: ValveCommand,
    pub emergency: bool,
    pub schedule: Vec<ScheduleEntry>,
    pub last_command_time: Option<String>,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            live_pressure: 0.0,
            valve_rotation: 0.0,
            motor_load: 0.0,
            auto_mode: true,
            command: ValveCommand::Idle,
            emergency: false,
            schedule: Vec::new(),
            last_command_time: None,
        }
    }
}

impl LiveState {
    /// Overwrite every field the snapshot carries; leave the rest as they were.
    pub fn merge(&mut self, snapshot: &LiveStateSnapshot) {
        if let Some(v) = snapshot.live_pressure {
            self.live_pressure = v;
        }
        if let Some(v) = snapshot.valve_rotation {
            self.valve_rotation = v;
        }
        if let Some(v) = snapshot.motor_load {
            self.motor_load = v;
        }
        if let Some(v) = snapshot.auto_mode {
            self.auto_mode = v;
        }
        if let Some(v) = snapshot.command {
            self.command = v;
        }
        if let Some(v) = snapshot.emergency {
            self.emergency = v;
        }
        if let Some(v) = &snapshot.schedule {
            self.schedule.clone_from(v);
        }
        if let Some(v) = &snapshot.last_command_time {
            self.last_command_time = Some(v.clone());
        }
    }
}

/// A raw read of `valve_system`, one optional value per field.
///
/// Parsing is field-by-field: a malformed field is dropped (and logged) instead
/// of failing the whole read, so one bad value written by the device cannot
/// blank the dashboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStateSnapshot {
    pub live_pressure: Option<f64>,
    pub valve_rotation: Option<f64>,
    pub motor_load: Option<f64>,
    pub auto_mode: Option<bool>,
    pub command: Option<ValveCommand>,
    pub emergency: Option<bool>,
    pub schedule: Option<Vec<ScheduleEntry>>,
    pub last_command_time: Option<String>,
}

impl LiveStateSnapshot {
    /// Parse the `valve_system` subtree. `null` (an empty tree) yields an empty snapshot.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("valve_system is not an object, ignoring");
            }
            return Self::default();
        };

        Self {
            live_pressure: number_field(obj, "live_pressure"),
            valve_rotation: number_field(obj, "valve_rotation"),
            motor_load: number_field(obj, "motor_load"),
            auto_mode: bool_field(obj, "auto_mode"),
            command: obj
                .get("command")
                .and_then(Value::as_str)
                .map(ValveCommand::parse),
            emergency: bool_field(obj, "emergency"),
            schedule: obj.get("schedule").map(parse_schedule),
            last_command_time: obj
                .get("last_command_time")
                .or_else(|| obj.get("last_cmd"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = obj.get(key)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return None,
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(field = key, value = %value, "Dropping non-numeric live field");
    }
    parsed.filter(|v| v.is_finite())
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// The store turns arrays into index-keyed objects once an element is removed,
/// so both shapes are accepted. Object entries are ordered by numeric index.
fn parse_schedule(value: &Value) -> Vec<ScheduleEntry> {
    let rows: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            let mut indexed: Vec<(u64, &Value)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<u64>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v).collect()
        }
        _ => Vec::new(),
    };

    rows.into_iter()
        .filter(|row| !row.is_null())
        .filter_map(|row| match serde_json::from_value::<ScheduleEntry>(row.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed schedule row");
                None
            }
        })
        .collect()
}

/// Role stored on a user record. Anything other than `super_admin` (or a
/// missing role) is an ordinary user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    #[default]
    #[serde(other)]
    User,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::User => "user",
        }
    }
}

/// Credential record under `valve_system/users/{username}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Legacy plaintext password, removed once the record is upgraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Argon2id PHC string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// One entry of the append-only `activity_logs` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActivityLogEntry {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_parses_mixed_numeric_shapes() {
        let snap = LiveStateSnapshot::from_value(&json!({
            "live_pressure": 4,
            "valve_rotation": "12.5",
            "motor_load": 1.75,
            "auto_mode": false,
            "command": "open",
            "emergency": 0,
            "last_cmd": "2026-01-01 08:00:00",
            "users": {"admin": {"password": "x"}}
        }));

        assert_eq!(snap.live_pressure, Some(4.0));
        assert_eq!(snap.valve_rotation, Some(12.5));
        assert_eq!(snap.motor_load, Some(1.75));
        assert_eq!(snap.auto_mode, Some(false));
        assert_eq!(snap.command, Some(ValveCommand::Open));
        assert_eq!(snap.emergency, Some(false));
        assert_eq!(snap.last_command_time.as_deref(), Some("2026-01-01 08:00:00"));
        assert_eq!(snap.schedule, None);
    }

    #[test]
    fn malformed_field_is_dropped_not_fatal() {
        let snap = LiveStateSnapshot::from_value(&json!({
            "live_pressure": "high",
            "motor_load": 2.0
        }));
        assert_eq!(snap.live_pressure, None);
        assert_eq!(snap.motor_load, Some(2.0));
    }

    #[test]
    fn schedule_accepts_index_keyed_object_and_aliases() {
        let snap = LiveStateSnapshot::from_value(&json!({
            "schedule": {
                "2": {"start_time": "18:00", "target": 2.5},
                "0": {"START_TIME": "08:00", "TARGET": 4.0}
            }
        }));
        let schedule = snap.schedule.unwrap();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule[0].start_time, "08:00");
        assert_eq!(schedule[1].target, 2.5);
    }

    #[test]
    fn null_tree_is_empty_snapshot() {
        assert!(LiveStateSnapshot::from_value(&Value::Null).is_empty());
    }

    #[test]
    fn merge_keeps_fields_the_snapshot_lacks() {
        let mut state = LiveState {
            live_pressure: 3.2,
            motor_load: 1.1,
            ..LiveState::default()
        };
        state.merge(&LiveStateSnapshot {
            live_pressure: Some(3.9),
            auto_mode: Some(false),
            ..LiveStateSnapshot::default()
        });
        assert_eq!(state.live_pressure, 3.9);
        assert_eq!(state.motor_load, 1.1);
        assert!(!state.auto_mode);
    }

    #[test]
    fn unknown_role_is_plain_user() {
        let record: UserRecord =
            serde_json::from_value(json!({"password": "p", "role": "operator"})).unwrap();
        assert_eq!(record.role, Role::User);
        let record: UserRecord = serde_json::from_value(json!({"password": "p"})).unwrap();
        assert_eq!(record.role, Role::User);
    }
}
