pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the router wires up most often.
pub use middleware::require_auth;
pub use ws_handler::ws_handler;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ConfigError;
use crate::error::ApiError;
use auth::{login_handler, logout_handler, me_handler, signup_handler};
use rest::*;
use state::AppState;

/// Builds the complete application: public auth routes, session-protected
/// routes, CORS and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me_handler))
        .route("/attendance", get(list_attendance_handler).post(mark_attendance_handler))
        .route("/attendance/user/{uid}", get(user_attendance_handler))
        .route("/tasks", get(list_tasks_handler).post(create_task_handler))
        .route("/tasks/user/{uid}", get(user_tasks_handler))
        .route("/tasks/{id}/status", patch(update_task_status_handler))
        .route("/tasks/{id}/rating", post(rate_task_handler))
        .route(
            "/performance/{uid}/{month}",
            get(get_performance_handler).put(put_performance_handler),
        )
        .route("/performance/{uid}/{month}/refresh", post(refresh_performance_handler))
        .route(
            "/notifications",
            get(list_notifications_handler).post(create_notification_handler),
        )
        .route("/notifications/{id}/read", post(mark_notification_read_handler))
        .route("/users", get(list_users_handler).post(save_user_handler))
        .route("/users/{uid}", delete(delete_user_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/reports/performance/{uid}/{month}", get(performance_report_handler))
        .route("/reports/attendance/{uid}", get(attendance_report_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), require_auth));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())))
}
