use std::env;
use std::time::Duration;

use crate::store::auth::{ServiceAccountKey, StoreCredentials};

/// Database URL every deployment of the dashboard has used so far.
pub const DEFAULT_DATABASE_URL: &str = "https://dbsensor-eb39d-default-rtdb.firebaseio.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployment {
    Local,
    Dev,
    Stage,
    Prod,
}

impl Deployment {
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "stage" | "staging" => Self::Stage,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

/// Which state store implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firebase,
    Memory,
}

/// Who may issue manual commands, toggle auto mode and edit the schedule.
///
/// STOP is never gated by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRole {
    AnyUser,
    SuperAdmin,
}

#[derive(Debug, Clone)]
pub struct Config {
    // State store
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub store_credentials: StoreCredentials,
    pub store_timeout_seconds: u64,

    // Polling
    pub poll_interval_ms: u64,
    pub live_cache_ttl_ms: u64,
    pub backoff_max_seconds: u64,
    pub backoff_jitter_ratio: f64,

    // Sessions
    pub session_idle_timeout_seconds: u64,

    // Dashboard
    pub activity_log_limit: usize,
    pub pressure_history_len: usize,
    pub rotation_unit: String,
    pub display_utc_offset_minutes: i32,

    // Access control
    pub control_role: ControlRole,
    pub bootstrap_admin_username: String,
    pub bootstrap_admin_password: String,
    pub upgrade_legacy_passwords: bool,

    // API settings
    pub api_host: String,
    pub api_port: u16,

    // Rate limiting
    pub disable_rate_limiting: bool,
    pub rate_limit_api_per_second: u64,
    pub rate_limit_api_burst: u32,
    pub rate_limit_login_per_second: u64,
    pub rate_limit_login_burst: u32,

    // Application metadata
    pub deployment: Deployment,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            store_credentials: StoreCredentials::Anonymous,
            store_timeout_seconds: 10,
            poll_interval_ms: 3000,
            live_cache_ttl_ms: 2000,
            backoff_max_seconds: 30,
            backoff_jitter_ratio: 0.2,
            session_idle_timeout_seconds: 600,
            activity_log_limit: 5,
            pressure_history_len: 24,
            rotation_unit: "REV".to_string(),
            display_utc_offset_minutes: 0,
            control_role: ControlRole::SuperAdmin,
            bootstrap_admin_username: "admin".to_string(),
            bootstrap_admin_password: "papak123".to_string(),
            upgrade_legacy_passwords: true,
            api_host: "0.0.0.0".to_string(),
            api_port: 3000,
            disable_rate_limiting: false,
            rate_limit_api_per_second: 1,
            rate_limit_api_burst: 120,
            rate_limit_login_per_second: 5,
            rate_limit_login_burst: 10,
            deployment: Deployment::Local,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a required variable is missing, a value does not
    /// parse, or the store credential bundle is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let store_backend = match vars.get("STORE_BACKEND").as_deref() {
            None | Some("firebase") => StoreBackend::Firebase,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    reason: format!("expected 'firebase' or 'memory', got '{other}'"),
                });
            }
        };

        let store_credentials = match store_backend {
            StoreBackend::Memory => StoreCredentials::Anonymous,
            StoreBackend::Firebase => load_credentials(&vars)?,
        };

        let control_role = match vars.get("CONTROL_ROLE").as_deref() {
            None | Some("super_admin") => ControlRole::SuperAdmin,
            Some("any") => ControlRole::AnyUser,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "CONTROL_ROLE",
                    reason: format!("expected 'super_admin' or 'any', got '{other}'"),
                });
            }
        };

        let backoff_jitter_ratio: f64 =
            vars.parse("BACKOFF_JITTER_RATIO", defaults.backoff_jitter_ratio)?;
        if !(0.0..=1.0).contains(&backoff_jitter_ratio) {
            return Err(ConfigError::Invalid {
                var: "BACKOFF_JITTER_RATIO",
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        let poll_interval_ms: u64 = vars.parse("POLL_INTERVAL_MS", defaults.poll_interval_ms)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            store_backend,
            database_url: vars
                .get("FIREBASE_DATABASE_URL")
                .unwrap_or(defaults.database_url)
                .trim_end_matches('/')
                .to_string(),
            store_credentials,
            store_timeout_seconds: vars
                .parse("STORE_TIMEOUT_SECONDS", defaults.store_timeout_seconds)?,

            poll_interval_ms,
            live_cache_ttl_ms: vars.parse("LIVE_CACHE_TTL_MS", defaults.live_cache_ttl_ms)?,
            backoff_max_seconds: vars
                .parse("BACKOFF_MAX_SECONDS", defaults.backoff_max_seconds)?,
            backoff_jitter_ratio,

            session_idle_timeout_seconds: vars.parse(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout_seconds,
            )?,

            activity_log_limit: vars
                .parse("ACTIVITY_LOG_LIMIT", defaults.activity_log_limit)?
                .clamp(1, 50),
            pressure_history_len: vars
                .parse("PRESSURE_HISTORY_LEN", defaults.pressure_history_len)?,
            rotation_unit: vars.get("ROTATION_UNIT").unwrap_or(defaults.rotation_unit),
            display_utc_offset_minutes: vars.parse(
                "DISPLAY_UTC_OFFSET_MINUTES",
                defaults.display_utc_offset_minutes,
            )?,

            control_role,
            bootstrap_admin_username: vars
                .get("BOOTSTRAP_ADMIN_USERNAME")
                .unwrap_or(defaults.bootstrap_admin_username),
            bootstrap_admin_password: vars
                .get("BOOTSTRAP_ADMIN_PASSWORD")
                .unwrap_or(defaults.bootstrap_admin_password),
            upgrade_legacy_passwords: vars
                .parse("UPGRADE_LEGACY_PASSWORDS", defaults.upgrade_legacy_passwords)?,

            api_host: vars.get("API_HOST").unwrap_or(defaults.api_host),
            api_port: vars.parse("API_PORT", defaults.api_port)?,

            disable_rate_limiting: vars
                .parse("DISABLE_RATE_LIMITING", defaults.disable_rate_limiting)?,
            rate_limit_api_per_second: vars
                .parse("RATE_LIMIT_API_PER_SECOND", defaults.rate_limit_api_per_second)?,
            rate_limit_api_burst: vars
                .parse("RATE_LIMIT_API_BURST", defaults.rate_limit_api_burst)?,
            rate_limit_login_per_second: vars
                .parse("RATE_LIMIT_LOGIN_PER_SECOND", defaults.rate_limit_login_per_second)?,
            rate_limit_login_burst: vars
                .parse("RATE_LIMIT_LOGIN_BURST", defaults.rate_limit_login_burst)?,

            deployment: Deployment::from_str(
                &vars.get("DEPLOYMENT").unwrap_or_else(|| "local".to_string()),
            ),
        })
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn live_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.live_cache_ttl_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }

    /// How long a session may go without requests or stream subscribers.
    /// `None` when expiry is disabled (`SESSION_IDLE_TIMEOUT_SECONDS=0`).
    #[must_use]
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.session_idle_timeout_seconds))
    }
}

/// Thin wrapper so every variable goes through the same trimming and parse errors.
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                reason: format!("'{raw}': {e}"),
            }),
        }
    }
}

fn load_credentials<F>(vars: &Vars<'_, F>) -> Result<StoreCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let bundle = match (
        vars.get("FIREBASE_CREDENTIALS"),
        vars.get("FIREBASE_CREDENTIALS_FILE"),
    ) {
        (Some(json), _) => Some(json),
        (None, Some(path)) => Some(std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::Credentials(format!("cannot read credentials file '{path}': {e}"))
        })?),
        (None, None) => None,
    };

    if let Some(bundle) = bundle {
        let key = ServiceAccountKey::from_json(&bundle)
            .map_err(|e| ConfigError::Credentials(e.to_string()))?;
        return Ok(StoreCredentials::ServiceAccount(key));
    }

    if let Some(secret) = vars.get("FIREBASE_DATABASE_SECRET") {
        return Ok(StoreCredentials::DatabaseSecret(secret));
    }

    Err(ConfigError::Missing(
        "FIREBASE_CREDENTIALS, FIREBASE_CREDENTIALS_FILE or FIREBASE_DATABASE_SECRET",
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Invalid store credentials: {0}")]
    Credentials(String),
}
