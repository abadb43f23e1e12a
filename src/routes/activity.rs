use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::common::AppState;
use crate::error::AppResult;
use crate::routes::session::DashboardSession;
use crate::services::activity;
use crate::store::ActivityLogEntry;

const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityQuery {
    /// Number of entries (1-50). Defaults to `ACTIVITY_LOG_LIMIT`.
    pub limit: Option<usize>,
}

/// Most recent activity-log entries, newest first
#[utoipa::path(
    get,
    path = "/api/activity",
    params(ActivityQuery),
    responses(
        (status = 200, description = "Activity entries", body = Vec<ActivityLogEntry>),
        (status = 401, description = "Not logged in"),
        (status = 502, description = "Store unreachable"),
    ),
    security(("session" = [])),
    tag = "dashboard"
)]
pub async fn list_activity(
    State(state): State<AppState>,
    _session: DashboardSession,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<ActivityLogEntry>>> {
    let limit = query
        .limit
        .unwrap_or(state.config.activity_log_limit)
        .clamp(1, MAX_LIMIT);
    Ok(Json(activity::recent(&state, limit).await?))
}
