//! Access to the hosted realtime key-value tree that owns the valve state.
//!
//! Layout of the tree:
//!
//! ```text
//! valve_system/            live telemetry, control flags, schedule
//! valve_system/users/{u}   credential records
//! activity_logs/{push-id}  append-only operator log
//! ```
//!
//! Everything above the [`StateStore`] trait is backend agnostic; the service
//! runs against [`FirebaseClient`] in production and [`MemoryStore`] locally
//! and in tests.

pub mod auth;
pub mod client;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use client::FirebaseClient;
pub use memory::MemoryStore;
pub use models::{
    ActivityLogEntry, LiveState, LiveStateSnapshot, Role, ScheduleEntry, UserRecord, ValveCommand,
};

pub const VALVE_SYSTEM_PATH: &str = "valve_system";
pub const USERS_PATH: &str = "valve_system/users";
pub const ACTIVITY_LOGS_PATH: &str = "activity_logs";

const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Store unavailable")]
    Unavailable,
}

/// Operations the dashboard needs from the state store.
///
/// Writes are partial (`update_*` merges only the supplied keys). There is no
/// versioning: concurrent writers to the same key race and the last one wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the whole `valve_system` subtree. `Value::Null` when it does not exist.
    async fn read_live_state(&self) -> Result<Value, StoreError>;

    /// Merge `fields` into `valve_system`, leaving other keys untouched.
    async fn update_live_state(&self, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append to `activity_logs`, returning the store-assigned key.
    async fn push_activity(&self, entry: &ActivityLogEntry) -> Result<String, StoreError>;

    /// The last `limit` entries by key, newest first.
    async fn recent_activity(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, ActivityLogEntry)>, StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Whether `valve_system/users` holds at least one record.
    async fn has_users(&self) -> Result<bool, StoreError>;

    async fn put_user(&self, username: &str, record: &UserRecord) -> Result<(), StoreError>;

    /// Merge `fields` into one user record. A `null` value deletes that key.
    async fn update_user(
        &self,
        username: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;
}

/// Whether `key` can be used as a single path segment in the tree.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key
            .chars()
            .any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_control())
}
