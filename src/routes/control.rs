use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::AppState;
use crate::control::{self, Command, DispatchReceipt};
use crate::error::AppResult;
use crate::render::DashboardView;
use crate::routes::session::DashboardSession;
use crate::store::ScheduleEntry;

/// Manual valve commands accepted on `/api/commands`.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManualCommand {
    Open,
    Close,
    Stop,
}

impl From<ManualCommand> for Command {
    fn from(value: ManualCommand) -> Self {
        match value {
            ManualCommand::Open => Self::Open,
            ManualCommand::Close => Self::Close,
            ManualCommand::Stop => Self::Stop,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandRequest {
    pub command: ManualCommand,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AutoModeRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    pub schedule: Vec<ScheduleEntry>,
}

/// Write result plus the view rendered right after it.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandResponse {
    pub receipt: DispatchReceipt,
    pub view: DashboardView,
}

async fn run(state: &AppState, session: DashboardSession, command: Command) -> AppResult<Json<CommandResponse>> {
    let DashboardSession(session) = session;
    let (receipt, view) = control::submit(state, &session, command).await?;
    Ok(Json(CommandResponse {
        receipt,
        view: (*view).clone(),
    }))
}

/// Send OPEN, CLOSE or STOP to the valve
///
/// OPEN and CLOSE are rejected while auto mode is on. STOP is always accepted
/// and raises the emergency flag.
#[utoipa::path(
    post,
    path = "/api/commands",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Command written", body = CommandResponse),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Rejected: mode_conflict or unauthorized"),
        (status = 502, description = "Store rejected the write"),
    ),
    security(("session" = [])),
    tag = "control"
)]
pub async fn post_command(
    State(state): State<AppState>,
    session: DashboardSession,
    Json(body): Json<CommandRequest>,
) -> AppResult<Json<CommandResponse>> {
    run(&state, session, body.command.into()).await
}

/// Switch between automatic and manual control
#[utoipa::path(
    put,
    path = "/api/auto-mode",
    request_body = AutoModeRequest,
    responses(
        (status = 200, description = "Mode written", body = CommandResponse),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Rejected: unauthorized"),
        (status = 502, description = "Store rejected the write"),
    ),
    security(("session" = [])),
    tag = "control"
)]
pub async fn put_auto_mode(
    State(state): State<AppState>,
    session: DashboardSession,
    Json(body): Json<AutoModeRequest>,
) -> AppResult<Json<CommandResponse>> {
    run(&state, session, Command::SetAutoMode(body.enabled)).await
}

/// Replace the time-based schedule
///
/// Entries are stored in the order given.
#[utoipa::path(
    put,
    path = "/api/schedule",
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule written", body = CommandResponse),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Rejected: unauthorized"),
        (status = 422, description = "Rejected: invalid_schedule"),
        (status = 502, description = "Store rejected the write"),
    ),
    security(("session" = [])),
    tag = "control"
)]
pub async fn put_schedule(
    State(state): State<AppState>,
    session: DashboardSession,
    Json(body): Json<ScheduleRequest>,
) -> AppResult<Json<CommandResponse>> {
    run(&state, session, Command::ApplySchedule(body.schedule)).await
}
