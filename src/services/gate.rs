//! Authentication gate: nothing past the login form runs for a session until
//! a submitted username/password pair matches a stored record.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::services::{activity, password};
use crate::session::{Principal, Session};
use crate::store::is_valid_key;
use crate::sync::poller;

pub const LOGIN_ACTION: &str = "Logged in";
pub const LOGOUT_ACTION: &str = "Logged out";

/// Check a username/password pair against the user collection.
///
/// Unknown users, wrong passwords, malformed usernames and store failures all
/// produce the same `InvalidCredentials`. Nothing is written on failure.
///
/// # Errors
///
/// `BadRequest` for an empty username, `InvalidCredentials` otherwise.
pub async fn authenticate(state: &AppState, username: &str, submitted: &str) -> AppResult<Principal> {
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_string()));
    }
    if !is_valid_key(username) {
        tracing::info!("Login rejected: username is not a valid store key");
        return Err(AppError::InvalidCredentials);
    }

    let record = match state.store.find_user(username).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::info!(username, "Login rejected: unknown user");
            return Err(AppError::InvalidCredentials);
        }
        Err(e) => {
            tracing::warn!(username, error = %e, "User lookup failed, denying access");
            return Err(AppError::InvalidCredentials);
        }
    };

    let role = record.role;
    let submitted_owned = submitted.to_string();
    let verification =
        tokio::task::spawn_blocking(move || password::verify(&record, &submitted_owned))
            .await
            .map_err(|e| AppError::Internal(format!("password check panicked: {e}")))?;

    match verification {
        password::Verification::Invalid => {
            tracing::info!(username, "Login rejected: wrong password");
            Err(AppError::InvalidCredentials)
        }
        password::Verification::Valid => Ok(Principal {
            username: username.to_string(),
            role,
        }),
        password::Verification::ValidLegacy => {
            if state.config.upgrade_legacy_passwords {
                upgrade_legacy_record(state, username, submitted).await;
            }
            Ok(Principal {
                username: username.to_string(),
                role,
            })
        }
    }
}

/// Replace a plaintext password with its hash. Failure is logged and ignored;
/// the operator is already authenticated.
async fn upgrade_legacy_record(state: &AppState, username: &str, plaintext: &str) {
    let plaintext = plaintext.to_string();
    let hashed = match tokio::task::spawn_blocking(move || password::hash_password(&plaintext)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => {
            tracing::warn!(username, error = %e, "Could not hash legacy password");
            return;
        }
        Err(e) => {
            tracing::warn!(username, error = %e, "Password hashing task failed");
            return;
        }
    };

    let mut fields = Map::new();
    fields.insert("password_hash".to_string(), json!(hashed));
    fields.insert("password".to_string(), Value::Null);

    match state.store.update_user(username, fields).await {
        Ok(()) => tracing::info!(username, "Upgraded legacy plaintext password to Argon2id"),
        Err(e) => tracing::warn!(username, error = %e, "Failed to upgrade legacy password"),
    }
}

/// `LOGGED_OUT` → `DASHBOARD` for `session`: authenticate, log the event and
/// start the session's poller.
///
/// # Errors
///
/// `Conflict` if the session is already authenticated, otherwise whatever
/// [`authenticate`] returns.
pub async fn login(
    state: &AppState,
    session: &Arc<Session>,
    username: &str,
    submitted: &str,
) -> AppResult<Principal> {
    if session.principal().await.is_some() {
        return Err(AppError::Conflict("Session is already logged in".to_string()));
    }

    let principal = authenticate(state, username, submitted).await?;

    if !session.context.write().await.login(principal.clone()) {
        return Err(AppError::Conflict("Session is already logged in".to_string()));
    }

    tracing::info!(
        session_id = %session.id,
        username = %principal.username,
        role = principal.role.as_str(),
        "Operator logged in"
    );
    activity::record(state, &principal, LOGIN_ACTION).await;
    session.attach_poller(poller::spawn(state.clone(), Arc::clone(session)));

    Ok(principal)
}

/// Log the event, leave `DASHBOARD`, and tear the session down.
pub async fn logout(state: &AppState, session: &Arc<Session>) {
    let principal = {
        let mut ctx = session.context.write().await;
        let principal = ctx.principal.clone();
        ctx.logout();
        principal
    };

    if let Some(principal) = &principal {
        activity::record(state, principal, LOGOUT_ACTION).await;
        tracing::info!(
            session_id = %session.id,
            username = %principal.username,
            "Operator logged out"
        );
    }

    state.sessions.remove(&session.id);
}
