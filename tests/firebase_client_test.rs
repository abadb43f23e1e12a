//! REST protocol of the hosted store, checked against a mock server.
//!
//! Run with: cargo test --test firebase_client_test

use serde_json::{Map, Value, json};
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use valve_control::config::{Config, StoreBackend};
use valve_control::store::auth::{ServiceAccountKey, StoreAuth, StoreCredentials};
use valve_control::store::{ActivityLogEntry, FirebaseClient, StateStore, StoreError};

const TEST_KEY_PEM: &str = include_str!("fixtures/test_service_account_key.pem");

fn secret_client(server: &MockServer) -> FirebaseClient {
    FirebaseClient::with_base_url(&server.uri(), StoreAuth::Secret("s3cret".to_string()))
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn reads_live_state_with_database_secret() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/valve_system.json"))
        .and(query_param("auth", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "live_pressure": 3.1,
            "auto_mode": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let raw = secret_client(&server).read_live_state().await.unwrap();
    assert_eq!(raw["live_pressure"], json!(3.1));
}

#[tokio::test]
async fn empty_tree_reads_as_null() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/valve_system.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let client = FirebaseClient::with_base_url(&server.uri(), StoreAuth::None);
    assert_eq!(client.read_live_state().await.unwrap(), Value::Null);
}

#[tokio::test]
async fn live_update_is_a_patch_of_only_the_given_keys() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/valve_system.json"))
        .and(body_json(json!({"command": "STOP", "emergency": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"command": "STOP", "emergency": true})))
        .expect(1)
        .mount(&server)
        .await;

    secret_client(&server)
        .update_live_state(fields(json!({"command": "STOP", "emergency": true})))
        .await
        .unwrap();
}

#[tokio::test]
async fn push_returns_generated_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/activity_logs.json"))
        .and(body_json(json!({
            "user": "admin",
            "action": "Opened valve",
            "timestamp": "2026-02-03 04:05:06",
            "role": "super_admin"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "-NxYz123"})))
        .expect(1)
        .mount(&server)
        .await;

    let entry = ActivityLogEntry {
        user: "admin".to_string(),
        action: "Opened valve".to_string(),
        timestamp: "2026-02-03 04:05:06".to_string(),
        role: Some("super_admin".to_string()),
    };
    let key = secret_client(&server).push_activity(&entry).await.unwrap();
    assert_eq!(key, "-NxYz123");
}

#[tokio::test]
async fn recent_activity_is_key_ordered_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activity_logs.json"))
        .and(query_param("orderBy", "\"$key\""))
        .and(query_param("limitToLast", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "-B": {"user": "u2", "action": "Closed valve", "timestamp": "t2"},
                "-C": {"user": "u3", "action": "EMERGENCY STOP", "timestamp": "t3"},
                "-A": {"user": "u1", "action": "Opened valve", "timestamp": "t1"}
            }"#,
        ))
        .mount(&server)
        .await;

    let entries = secret_client(&server).recent_activity(3).await.unwrap();
    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["-C", "-B", "-A"]);
    assert_eq!(entries[0].1.action, "EMERGENCY STOP");
    assert_eq!(entries[0].1.role, None);
}

#[tokio::test]
async fn malformed_log_entries_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activity_logs.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "-A": {"user": "u1", "action": "Opened valve", "timestamp": "t1"},
            "-B": "garbage"
        })))
        .mount(&server)
        .await;

    let entries = secret_client(&server).recent_activity(5).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "-A");
}

#[tokio::test]
async fn missing_user_is_none_and_bad_keys_never_hit_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/valve_system/users/ghost.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .expect(1)
        .mount(&server)
        .await;

    let client = secret_client(&server);
    assert!(client.find_user("ghost").await.unwrap().is_none());

    let err = client.find_user("a/b").await.unwrap_err();
    assert!(matches!(err, StoreError::Request(_)));
}

#[tokio::test]
async fn user_presence_uses_shallow_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/valve_system/users.json"))
        .and(query_param("shallow", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"admin": true})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(secret_client(&server).has_users().await.unwrap());
}

#[tokio::test]
async fn user_update_sends_null_to_delete() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/valve_system/users/admin.json"))
        .and(body_json(json!({"password_hash": "$argon2id$x", "password": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    secret_client(&server)
        .update_user(
            "admin",
            fields(json!({"password_hash": "$argon2id$x", "password": null})),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/valve_system.json"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"Permission denied"}"#))
        .mount(&server)
        .await;

    let err = secret_client(&server).read_live_state().await.unwrap_err();
    match err {
        StoreError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("Permission denied"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn service_account_token_is_exchanged_once_and_reused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("assertion=eyJ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.test-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/valve_system.json"))
        .and(query_param("access_token", "ya29.test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"motor_load": 2})))
        .expect(2)
        .mount(&server)
        .await;

    // Keys pasted from secret stores often carry literal "\n" escapes.
    let escaped_key = TEST_KEY_PEM.replace('\n', "\\n");
    let bundle = json!({
        "project_id": "valve-test",
        "client_email": "dashboard@valve-test.iam.gserviceaccount.com",
        "private_key": format!("  {escaped_key}  "),
        "token_uri": format!("{}/token", server.uri()),
    });
    let key = ServiceAccountKey::from_json(&bundle.to_string()).unwrap();
    let config = Config {
        store_backend: StoreBackend::Firebase,
        database_url: server.uri(),
        store_credentials: StoreCredentials::ServiceAccount(key),
        ..Config::default()
    };

    let client = FirebaseClient::new(&config).unwrap();
    client.read_live_state().await.unwrap();
    client.read_live_state().await.unwrap();
}
