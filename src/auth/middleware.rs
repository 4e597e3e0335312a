use super::{AuthError, AuthState, csrf::CsrfVerifier, unix_now};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Gate for every route that acts on behalf of the user.
///
/// Resolves the user, verifies CSRF, records activity and exposes the
/// [`super::User`] to the handler through request extensions.
pub async fn require_auth(
    State(auth): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = unix_now();
    let authenticator = auth.authenticator();

    let mut resolved = match authenticator.resolve_user(request.headers(), now).await {
        Ok(resolved) => resolved,
        Err(AuthError::UpstreamIdp(reason)) => {
            // The session is kept; the provider may be back on the next request.
            warn!(reason = %reason, "identity provider unavailable");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "identity provider unavailable",
            )
                .into_response();
        }
        Err(err) => {
            match &err {
                AuthError::RefreshFailed(_) => warn!(error = %err, "rejecting request"),
                _ => debug!(error = %err, "rejecting request"),
            }
            let cookies = authenticator.clear_session_cookies(request.headers());
            return with_cookies(
                (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
                cookies,
            );
        }
    };

    if let Err(err) = auth.csrf().verify(request.method(), request.headers()) {
        warn!(error = %err, method = %request.method(), path = %request.uri().path(), "csrf check failed");
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }

    if let Err(err) = authenticator.touch(&mut resolved, now) {
        error!(error = %err, "failed to record session activity");
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
    }

    let mut cookies = authenticator.session_cookies(&resolved, now);
    let needs_csrf_cookie = super::csrf::is_safe_method(request.method())
        && !CsrfVerifier::has_cookie(request.headers());

    request.extensions_mut().insert(resolved.user().clone());
    let response = next.run(request).await;

    if needs_csrf_cookie {
        match auth.csrf().issue_cookie() {
            Ok(cookie) => cookies.push(cookie),
            Err(err) => error!(error = %err, "failed to issue csrf cookie"),
        }
    }
    with_cookies(response, cookies)
}

fn with_cookies(mut response: Response, cookies: Vec<HeaderValue>) -> Response {
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
