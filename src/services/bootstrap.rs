use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::services::password;
use crate::store::{Role, UserRecord};

/// Seed the configured admin account if the user collection is empty.
///
/// Returns `true` when a record was written. Runs once at startup; existing
/// collections are never touched.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written, or hashing fails.
pub async fn ensure_default_user(state: &AppState) -> AppResult<bool> {
    if state.store.has_users().await? {
        tracing::debug!("User collection already populated");
        return Ok(false);
    }

    let username = state.config.bootstrap_admin_username.clone();
    let plaintext = state.config.bootstrap_admin_password.clone();
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plaintext))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let record = UserRecord {
        password: None,
        password_hash: Some(hash),
        role: Role::SuperAdmin,
    };
    state.store.put_user(&username, &record).await?;

    tracing::warn!(
        username = %username,
        "Seeded default admin account; change its password"
    );
    Ok(true)
}
