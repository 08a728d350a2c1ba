//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use sapt_core::SessionState;
use std::sync::Arc;
use tracing::error;

use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "session";

/// The session token carried by the `session` cookie, if any.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .filter(|token| !token.is_empty())
}

/// Middleware that resolves the session cookie into a `SessionContext`.
///
/// If the token maps to a signed-in identity, the resolved context is inserted
/// into the request extensions for handlers to use. Otherwise returns 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = session_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let session = state.auth.session_for_token(token).await.map_err(|e| {
        error!("Failed to resolve auth session: {:?}", e);
        StatusCode::UNAUTHORIZED
    })?;

    if !matches!(session.state(), SessionState::Authenticated { .. }) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_the_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc123; lang=en"));
        assert_eq!(session_token(&headers), Some("abc123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);

        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
