pub mod activity;
pub mod control;
pub mod dashboard;
pub mod health;
pub mod session;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_scalar::{Scalar, Servable};

use crate::common::AppState;
use crate::config::ConfigError;
use crate::services::rate_limit::{ClientIpKeyExtractor, SessionOrIpKeyExtractor};

/// Password checks run on the blocking pool; cap how many queue up at once.
const LOGIN_CONCURRENCY: usize = 8;

struct SessionSecurity;

impl Modify for SessionSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("session id (UUID)")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        session::create_session,
        session::get_session,
        session::login,
        session::logout,
        dashboard::get_dashboard,
        dashboard::stream_dashboard,
        control::post_command,
        control::put_auto_mode,
        control::put_schedule,
        activity::list_activity,
    ),
    components(
        schemas(
            health::HealthResponse,
            session::SessionResponse,
            session::LoginRequest,
            control::ManualCommand,
            control::CommandRequest,
            control::AutoModeRequest,
            control::ScheduleRequest,
            control::CommandResponse,
            crate::control::DispatchReceipt,
            crate::control::CommandKind,
            crate::control::ControlGates,
            crate::render::DashboardView,
            crate::render::Metrics,
            crate::session::SessionPhase,
            crate::session::PressureSample,
            crate::store::ActivityLogEntry,
            crate::store::ScheduleEntry,
            crate::store::ValveCommand,
            crate::store::Role,
        )
    ),
    modifiers(&SessionSecurity),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Sessions, login and logout"),
        (name = "dashboard", description = "Live state, activity log and view stream"),
        (name = "control", description = "Valve commands, mode and schedule"),
    ),
    info(
        title = "Valve Control API",
        description = "Monitoring and control of a remote gate valve",
        version = "0.1.0"
    )
)]
struct ApiDoc;

/// Assemble the HTTP surface.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if a rate-limit quota is zero.
pub fn build_router(state: AppState) -> Result<Router, ConfigError> {
    let config = Arc::clone(&state.config);

    if config.disable_rate_limiting {
        tracing::warn!("Rate limiting DISABLED");
    } else {
        tracing::info!(
            api_rate = %format!("1 per {}s burst {}", config.rate_limit_api_per_second, config.rate_limit_api_burst),
            login_rate = %format!("1 per {}s burst {}", config.rate_limit_login_per_second, config.rate_limit_login_burst),
            "Rate limiting configured"
        );
    }

    let login_routes_base = Router::new()
        .route("/login", post(session::login))
        .layer(ConcurrencyLimitLayer::new(LOGIN_CONCURRENCY));

    let api_routes_base = Router::new()
        .route("/sessions", post(session::create_session))
        .route("/session", get(session::get_session))
        .route("/logout", post(session::logout))
        .route("/dashboard", get(dashboard::get_dashboard))
        .route("/dashboard/stream", get(dashboard::stream_dashboard))
        .route("/commands", post(control::post_command))
        .route("/auto-mode", put(control::put_auto_mode))
        .route("/schedule", put(control::put_schedule))
        .route("/activity", get(activity::list_activity));

    let api_routes = if config.disable_rate_limiting {
        Router::new().merge(login_routes_base).merge(api_routes_base)
    } else {
        let api_limiter = GovernorConfigBuilder::default()
            .key_extractor(SessionOrIpKeyExtractor)
            .per_second(config.rate_limit_api_per_second)
            .burst_size(config.rate_limit_api_burst)
            .finish()
            .ok_or_else(|| ConfigError::Invalid {
                var: "RATE_LIMIT_API_PER_SECOND",
                reason: "quota must be non-zero".to_string(),
            })?;

        let login_limiter = GovernorConfigBuilder::default()
            .key_extractor(ClientIpKeyExtractor)
            .per_second(config.rate_limit_login_per_second)
            .burst_size(config.rate_limit_login_burst)
            .finish()
            .ok_or_else(|| ConfigError::Invalid {
                var: "RATE_LIMIT_LOGIN_PER_SECOND",
                reason: "quota must be non-zero".to_string(),
            })?;

        Router::new()
            .merge(login_routes_base.layer(GovernorLayer {
                config: Arc::new(login_limiter),
            }))
            .merge(api_routes_base.layer(GovernorLayer {
                config: Arc::new(api_limiter),
            }))
    }
    .layer(RequestBodyLimitLayer::new(64 * 1024));

    // Health check and shell (NO rate limiting)
    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/", get(dashboard::index));

    let docs_routes = Router::new().merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    Ok(Router::new()
        .nest("/api", api_routes)
        .merge(public_routes)
        .merge(docs_routes)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
