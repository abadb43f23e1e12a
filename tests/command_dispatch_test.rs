//! Key updates, activity entries and validation for operator commands.
//!
//! Run with: cargo test --test command_dispatch_test

mod common;

use std::sync::Arc;

use serde_json::json;

use valve_control::config::{Config, ControlRole};
use valve_control::control::{self, Command, CommandKind, CommandPolicy, Rejection};
use valve_control::error::AppError;
use valve_control::store::{LiveState, MemoryStore, ScheduleEntry};

use common::{admin, live_fixture, operator, state_with, test_config};

fn entry(start_time: &str, target: f64) -> ScheduleEntry {
    ScheduleEntry {
        start_time: start_time.to_string(),
        target,
    }
}

#[tokio::test]
async fn stop_sets_emergency_in_any_mode() {
    for auto_mode in [true, false] {
        let store = Arc::new(MemoryStore::with_live_state(json!({"auto_mode": auto_mode})));
        let state = state_with(Arc::clone(&store), test_config());

        let receipt = control::dispatch(&state, &operator(), &Command::Stop).await.unwrap();

        let fields = store.live_fields().await;
        assert_eq!(fields["command"], json!("STOP"));
        assert_eq!(fields["emergency"], json!(true));
        assert_eq!(fields["auto_mode"], json!(auto_mode));
        assert_eq!(fields["last_cmd"], json!(receipt.issued_at));
        assert_eq!(receipt.command, CommandKind::Stop);
        assert!(receipt.written && receipt.logged);
    }
}

#[tokio::test]
async fn direct_open_in_auto_mode_is_written_but_fails_validation() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    let live = LiveState {
        auto_mode: true,
        ..LiveState::default()
    };

    let policy = CommandPolicy::from_config(&state.config);
    assert_eq!(
        policy.check(&admin(), &live, &Command::Open),
        Err(Rejection::ModeConflict)
    );

    // dispatch itself does not re-check the mode.
    control::dispatch(&state, &admin(), &Command::Open).await.unwrap();
    assert_eq!(store.live_fields().await["command"], json!("OPEN"));
}

#[tokio::test]
async fn every_command_logs_exactly_one_entry() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    let commands = [
        Command::SetAutoMode(false),
        Command::Open,
        Command::Close,
        Command::Stop,
        Command::ApplySchedule(vec![entry("07:30", 3.0)]),
    ];

    for (i, command) in commands.iter().enumerate() {
        control::dispatch(&state, &admin(), command).await.unwrap();
        let log = store.activity().await;
        assert_eq!(log.len(), i + 1);
        let last = log.last().unwrap();
        assert_eq!(last.user, "admin");
        assert!(!last.action.is_empty());
        assert_eq!(last.action, command.describe());
    }
}

#[tokio::test]
async fn schedule_write_preserves_order_and_other_fields() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    let before = store.live_fields().await;

    let schedule = vec![entry("22:00", 1.5), entry("05:00", 4.0), entry("12:30", 2.25)];
    control::dispatch(&state, &admin(), &Command::ApplySchedule(schedule))
        .await
        .unwrap();

    let after = store.live_fields().await;
    assert_eq!(
        after["schedule"],
        json!([
            {"start_time": "22:00", "target": 1.5},
            {"start_time": "05:00", "target": 4.0},
            {"start_time": "12:30", "target": 2.25}
        ])
    );
    for key in ["live_pressure", "valve_rotation", "motor_load", "auto_mode", "command", "emergency", "last_cmd"] {
        assert_eq!(after[key], before[key], "{key} changed");
    }
}

#[tokio::test]
async fn rejected_write_is_surfaced_and_logged_as_failed() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    store.reject_live_writes(true);

    let result = control::dispatch(&state, &admin(), &Command::Stop).await;
    assert!(matches!(result, Err(AppError::Store(_))));

    assert_eq!(store.live_fields().await["command"], json!("IDLE"));
    let log = store.activity().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, "EMERGENCY STOP [FAILED]");
}

#[tokio::test]
async fn outage_fails_both_write_and_log() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    store.set_offline(true);

    let result = control::dispatch(&state, &admin(), &Command::Open).await;
    assert!(matches!(result, Err(AppError::Store(_))));

    store.set_offline(false);
    assert!(store.activity().await.is_empty());
    assert_eq!(store.live_fields().await["command"], json!("IDLE"));
}

#[tokio::test]
async fn submit_rejects_before_writing() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    let session = state.sessions.create();
    session.context.write().await.login(admin());
    let writes_before = store.writes();

    let result = control::submit(&state, &session, Command::Open).await;
    assert!(matches!(result, Err(AppError::Rejected(Rejection::ModeConflict))));

    let bad = Command::ApplySchedule(vec![entry("25:00", 1.0)]);
    let result = control::submit(&state, &session, bad).await;
    assert!(matches!(result, Err(AppError::Rejected(Rejection::InvalidSchedule(_)))));

    assert_eq!(store.writes(), writes_before);
}

#[tokio::test]
async fn submit_enforces_control_role() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(Arc::clone(&store), test_config());
    let session = state.sessions.create();
    session.context.write().await.login(operator());

    let result = control::submit(&state, &session, Command::SetAutoMode(false)).await;
    assert!(matches!(result, Err(AppError::Rejected(Rejection::Unauthorized))));

    let (receipt, view) = control::submit(&state, &session, Command::Stop).await.unwrap();
    assert_eq!(receipt.command, CommandKind::Stop);
    assert!(view.emergency);
    assert!(!view.controls.auto_toggle);
}

#[tokio::test]
async fn submit_returns_view_rendered_after_the_write() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let config = Config {
        control_role: ControlRole::AnyUser,
        ..test_config()
    };
    let state = state_with(Arc::clone(&store), config);
    let session = state.sessions.create();
    session.context.write().await.login(operator());

    let (_, view) = control::submit(&state, &session, Command::SetAutoMode(false))
        .await
        .unwrap();
    assert!(!view.auto_mode);
    assert!(view.controls.open && view.controls.close);

    let (_, view) = control::submit(&state, &session, Command::Open).await.unwrap();
    assert_eq!(view.command.as_str(), "OPEN");
    assert_eq!(view.recent_activity[0].action, "Opened valve");
    assert_eq!(session.latest_view().unwrap().cycle, view.cycle);
}

#[tokio::test]
async fn logged_out_session_cannot_submit() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(store, test_config());
    let session = state.sessions.create();

    let result = control::submit(&state, &session, Command::Stop).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn each_submit_adds_one_pressure_sample() {
    let store = Arc::new(MemoryStore::with_live_state(live_fixture()));
    let state = state_with(store, test_config());
    let session = state.sessions.create();
    session.context.write().await.login(admin());

    let rejected = control::submit(&state, &session, Command::Open).await;
    assert!(matches!(rejected, Err(AppError::Rejected(Rejection::ModeConflict))));
    assert!(session.context.read().await.pressure_history.is_empty());

    let (_, view) = control::submit(&state, &session, Command::SetAutoMode(false))
        .await
        .unwrap();
    assert_eq!(view.pressure_history.len(), 1);

    control::submit(&state, &session, Command::Close).await.unwrap();
    assert_eq!(session.context.read().await.pressure_history.len(), 2);
}
