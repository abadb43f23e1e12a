use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::control::{Command, CommandKind, CommandPolicy};
use crate::error::{AppError, AppResult};
use crate::render::{self, DashboardView};
use crate::services::{activity, cache};
use crate::session::{Principal, Session};

const FAILED_SUFFIX: &str = " [FAILED]";

/// What happened to one dispatched command.
///
/// `written` only says the store accepted the partial update. Whether the valve
/// actually moved shows up in a later poll, when the field device reports back.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchReceipt {
    pub command: CommandKind,
    pub action: String,
    pub issued_at: String,
    pub written: bool,
    pub logged: bool,
    pub log_key: Option<String>,
}

/// Write `command` to the live state and append its activity entry.
///
/// No mode or role checks happen here; callers that take operator input go
/// through [`submit`].
///
/// # Errors
///
/// Returns `AppError::Store` if the partial update was not accepted. The
/// activity entry is still appended, tagged `[FAILED]`.
pub async fn dispatch(
    state: &AppState,
    actor: &Principal,
    command: &Command,
) -> AppResult<DispatchReceipt> {
    let issued_at = activity::format_timestamp(&state.config, Utc::now());
    let fields = command.updates(&issued_at);
    let action = command.describe();

    let write = state.store.update_live_state(fields).await;

    let logged_action = if write.is_ok() {
        action.clone()
    } else {
        format!("{action}{FAILED_SUFFIX}")
    };
    let log_key = activity::record(state, actor, &logged_action).await;

    match write {
        Ok(()) => {
            cache::invalidate(state).await;
            tracing::info!(
                user = %actor.username,
                command = ?command.kind(),
                issued_at = %issued_at,
                "Command written"
            );
            Ok(DispatchReceipt {
                command: command.kind(),
                action,
                issued_at,
                written: true,
                logged: log_key.is_some(),
                log_key,
            })
        }
        Err(e) => {
            tracing::error!(
                user = %actor.username,
                command = ?command.kind(),
                error = %e,
                "Command write failed"
            );
            Err(AppError::Store(e))
        }
    }
}

/// Validate, dispatch and re-render for an authenticated session.
///
/// The returned view is rendered after the write; the session's poller then
/// waits a full interval before its next cycle.
///
/// # Errors
///
/// `Unauthorized` for a logged-out session, `Rejected` when validation fails,
/// or whatever [`dispatch`] returns.
pub async fn submit(
    state: &AppState,
    session: &Arc<Session>,
    command: Command,
) -> AppResult<(DispatchReceipt, Arc<DashboardView>)> {
    let principal = session
        .principal()
        .await
        .ok_or_else(|| AppError::Unauthorized("Login required".to_string()))?;

    let live = cache::refresh_fallback(state, session).await.live;
    if let Err(rejection) = CommandPolicy::from_config(&state.config).check(&principal, &live, &command) {
        tracing::info!(
            session_id = %session.id,
            user = %principal.username,
            command = ?command.kind(),
            reason = rejection.code(),
            "Command rejected"
        );
        return Err(rejection.into());
    }

    let result = dispatch(state, &principal, &command).await;
    // Subscribers see the post-command state (or the failed-write log entry) either way.
    let view = render::refresh_view(state, session).await;
    session.restart_poll_timer();
    Ok((result?, view))
}
