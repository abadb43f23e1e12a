//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use valve_control::common::AppState;
use valve_control::config::Config;
use valve_control::session::Principal;
use valve_control::store::{MemoryStore, Role};

/// Config for tests: memory backend, no rate limiting, no jitter.
pub fn test_config() -> Config {
    Config {
        disable_rate_limiting: true,
        backoff_jitter_ratio: 0.0,
        ..Config::default()
    }
}

pub fn state_with(store: Arc<MemoryStore>, config: Config) -> AppState {
    AppState::new(config, store)
}

pub fn live_fixture() -> Value {
    json!({
        "live_pressure": 3.25,
        "valve_rotation": 12.5,
        "motor_load": 1.2,
        "auto_mode": true,
        "command": "IDLE",
        "emergency": false,
        "schedule": [
            {"start_time": "06:00", "target": 3.5},
            {"start_time": "18:00", "target": 2.0}
        ],
        "last_cmd": "2026-01-01 00:00:00"
    })
}

pub fn admin() -> Principal {
    Principal {
        username: "admin".to_string(),
        role: Role::SuperAdmin,
    }
}

pub fn operator() -> Principal {
    Principal {
        username: "somchai".to_string(),
        role: Role::User,
    }
}

/// Store with the fixture live state and two legacy plaintext accounts.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    store
        .insert_user("admin", json!({"password": "papak123", "role": "super_admin"}))
        .await;
    store
        .insert_user("somchai", json!({"password": "valve1", "role": "user"}))
        .await;
    store
}
