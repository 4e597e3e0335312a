//! Login, callback, logout and error-page handlers.
//!
//! Paths are relative to the console base path.

use crate::auth::{AuthState, User, oauth2::CallbackParams};
use axum::{
    Form,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

const MAX_ERROR_CODE_LEN: usize = 32;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginParams {
    /// Console path to return to after login.
    pub then: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ErrorParams {
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    /// Front-channel logout URL of the identity provider, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_redirect: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmI {
    pub authenticated: bool,
}

#[utoipa::path(
    get,
    path = "/auth/login",
    params(LoginParams),
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 303, description = "Provider unavailable, redirect to the error page"),
        (status = 500, description = "Invalid auth code URL")
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(auth): Extension<Arc<AuthState>>,
    Query(params): Query<LoginParams>,
) -> Response {
    auth.authenticator().login(params.then.as_deref()).await
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 303, description = "Session established, or redirect to the error page")
    ),
    tag = "auth"
)]
pub async fn callback(
    Extension(auth): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    auth.authenticator().callback(&headers, params).await
}

/// `response_mode=form_post` variant of the callback.
#[utoipa::path(
    post,
    path = "/auth/callback",
    request_body(
        content = CallbackParams,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 303, description = "Session established, or redirect to the error page")
    ),
    tag = "auth"
)]
pub async fn callback_form(
    Extension(auth): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Form(params): Form<CallbackParams>,
) -> Response {
    auth.authenticator().callback(&headers, params).await
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session cookies cleared", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(Extension(auth): Extension<Arc<AuthState>>, headers: HeaderMap) -> Response {
    let authenticator = auth.authenticator();
    let cookies = authenticator.logout(&headers);
    let body = LogoutResponse {
        logout_redirect: authenticator.logout_redirect().map(ToString::to_string),
    };

    let mut response = (StatusCode::OK, Json(body)).into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

#[utoipa::path(
    get,
    path = "/error",
    params(ErrorParams),
    responses(
        (status = 200, description = "Login error page", body = String, content_type = "text/plain")
    ),
    tag = "auth"
)]
pub async fn error_page(
    Extension(auth): Extension<Arc<AuthState>>,
    Query(params): Query<ErrorParams>,
) -> impl IntoResponse {
    let code = params
        .error
        .as_deref()
        .filter(|code| is_error_code(code))
        .unwrap_or("unknown");

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!(
            "Authentication failed ({code}).\nLog in again at {}auth/login\n",
            auth.base_path()
        ),
    )
}

#[utoipa::path(
    get,
    path = "/api/whoami",
    responses(
        (status = 200, description = "The request carries a valid session", body = WhoAmI),
        (status = 401, description = "Not logged in")
    ),
    tag = "auth"
)]
pub async fn whoami(_user: User) -> Json<WhoAmI> {
    Json(WhoAmI {
        authenticated: true,
    })
}

// Codes are echoed back to the browser.
fn is_error_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_ERROR_CODE_LEN
        && code.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_restricted() {
        assert!(is_error_code("login_state"));
        assert!(is_error_code("oauth_error"));
        assert!(!is_error_code(""));
        assert!(!is_error_code("<script>"));
        assert!(!is_error_code(&"a".repeat(MAX_ERROR_CODE_LEN + 1)));
    }

    #[test]
    fn logout_response_omits_missing_redirect() -> anyhow::Result<()> {
        let empty = serde_json::to_string(&LogoutResponse {
            logout_redirect: None,
        })?;
        assert_eq!(empty, "{}");

        let with_redirect = serde_json::to_string(&LogoutResponse {
            logout_redirect: Some("https://idp.example.test/logout".to_string()),
        })?;
        assert_eq!(
            with_redirect,
            r#"{"logoutRedirect":"https://idp.example.test/logout"}"#
        );
        Ok(())
    }
}
