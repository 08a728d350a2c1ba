//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout and the current
//! session.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Duration;
use sapt_core::{AuthGrant, Role, SessionContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::web::middleware::{session_token, SESSION_COOKIE};
use crate::web::rest::{reject_auth, reject_data};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    /// One of admin, supervisor, student, employee.
    #[schema(value_type = String, example = "employee")]
    pub role: Role,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub uid: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    /// `None` until a readable profile exists.
    #[schema(value_type = Option<String>)]
    pub role: Option<Role>,
}

fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl.num_seconds()
    )
}

fn grant_response(state: &AppState, status: StatusCode, grant: AuthGrant) -> impl IntoResponse {
    let cookie = session_cookie(&grant.token, Duration::days(state.config.session_ttl_days));
    let response = AuthResponse {
        uid: grant.identity.uid,
        email: grant.identity.email,
    };
    (status, [(header::SET_COOKIE, cookie)], Json(response))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new account and its profile
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let grant = state
        .auth
        .sign_up(&req.email, &req.password, req.role)
        .await
        .map_err(reject_auth)?;
    Ok(grant_response(&state, StatusCode::CREATED, grant))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let grant = state
        .auth
        .sign_in(&req.email, &req.password)
        .await
        .map_err(reject_auth)?;
    Ok(grant_response(&state, StatusCode::OK, grant))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let token = session_token(&headers).ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state.auth.sign_out(token).await.map_err(|e| {
        error!("Failed to delete auth session: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
    })?;

    let cookie = session_cookie("", Duration::zero());
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

/// GET /me - The signed-in identity and its resolved role
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current session", body = MeResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<MeResponse>, (StatusCode, String)> {
    let identity = session.require_signed_in().map_err(reject_auth)?;
    let profile = state
        .data
        .get_user(&session.caller(), &identity.uid)
        .await
        .map_err(reject_data)?;

    Ok(Json(MeResponse {
        uid: identity.uid,
        email: identity.email,
        name: profile.map(|user| user.name),
        role: session.role(),
    }))
}
