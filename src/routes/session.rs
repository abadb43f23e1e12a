use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::services::gate;
use crate::session::{Session, SessionPhase};
use crate::store::Role;

/// Session id from `Authorization: Bearer <uuid>`. `Ok(None)` when no header was sent.
fn bearer_id(parts: &Parts) -> AppResult<Option<Uuid>> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| token.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| AppError::Unauthorized("Malformed session token".to_string()))
}

/// Resolve a bearer id; every authenticated request keeps its session alive.
fn lookup(state: &AppState, id: Uuid) -> AppResult<Arc<Session>> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| AppError::Unauthorized("Unknown or expired session".to_string()))?;
    session.touch();
    Ok(session)
}

/// The caller's session, in any phase.
pub struct CurrentSession(pub Arc<Session>);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = bearer_id(parts)?
            .ok_or_else(|| AppError::Unauthorized("Missing session token".to_string()))?;
        lookup(state, id).map(Self)
    }
}

/// The caller's session, which must be in `DASHBOARD`.
pub struct DashboardSession(pub Arc<Session>);

impl FromRequestParts<AppState> for DashboardSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentSession(session) = CurrentSession::from_request_parts(parts, state).await?;
        if session.phase().await != SessionPhase::Dashboard {
            return Err(AppError::Unauthorized("Login required".to_string()));
        }
        Ok(Self(session))
    }
}

/// The caller's session when one was named; login creates one otherwise.
pub struct MaybeSession(pub Option<Arc<Session>>);

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_id(parts)? {
            Some(id) => lookup(state, id).map(|s| Self(Some(s))),
            None => Ok(Self(None)),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

async fn describe(session: &Session) -> SessionResponse {
    let ctx = session.context.read().await;
    SessionResponse {
        session_id: session.id,
        phase: ctx.phase,
        username: ctx.principal.as_ref().map(|p| p.username.clone()),
        role: ctx.principal.as_ref().map(|p| p.role),
        created_at: session.created_at,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Open a new logged-out session
#[utoipa::path(
    post,
    path = "/api/sessions",
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
    ),
    tag = "session"
)]
pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionResponse>) {
    let session = state.sessions.create();
    (StatusCode::CREATED, Json(describe(&session).await))
}

/// Current phase and operator of the calling session
#[utoipa::path(
    get,
    path = "/api/session",
    responses(
        (status = 200, description = "Session found", body = SessionResponse),
        (status = 401, description = "Missing or unknown session"),
    ),
    security(("session" = [])),
    tag = "session"
)]
pub async fn get_session(CurrentSession(session): CurrentSession) -> Json<SessionResponse> {
    Json(describe(&session).await)
}

/// Log in with a username and password
///
/// Without a bearer token a fresh session is created; its id is returned in
/// the response and must be sent on every later request.
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 400, description = "Username missing"),
        (status = 401, description = "Invalid username or password"),
        (status = 409, description = "Session already logged in"),
    ),
    tag = "session"
)]
pub async fn login(
    State(state): State<AppState>,
    MaybeSession(existing): MaybeSession,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let created = existing.is_none();
    let session = existing.unwrap_or_else(|| state.sessions.create());

    match gate::login(&state, &session, body.username.trim(), &body.password).await {
        Ok(_) => Ok(Json(describe(&session).await)),
        Err(e) => {
            if created {
                state.sessions.remove(&session.id);
            }
            Err(e)
        }
    }
}

/// Log out and end the session
#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 204, description = "Logged out; the session id is no longer valid"),
        (status = 401, description = "Missing or unknown session"),
    ),
    security(("session" = [])),
    tag = "session"
)]
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> StatusCode {
    gate::logout(&state, &session).await;
    StatusCode::NO_CONTENT
}
