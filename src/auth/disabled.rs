use super::{Resolved, User, csrf::CsrfVerifier, redirect_response};
use axum::{
    http::{HeaderValue, StatusCode},
    response::Response,
};
use secrecy::SecretString;
use tracing::error;

/// Every request acts as the operator of the static bearer token.
#[derive(Debug)]
pub struct DisabledAuthenticator {
    token: SecretString,
    csrf: CsrfVerifier,
    base_path: String,
}

impl DisabledAuthenticator {
    #[must_use]
    pub fn new(token: SecretString, csrf: CsrfVerifier, base_path: String) -> Self {
        Self {
            token,
            csrf,
            base_path,
        }
    }

    pub(crate) fn resolve_user(&self) -> Resolved {
        Resolved::new(User::new(self.token.clone()), None)
    }

    pub(crate) fn login(&self) -> Response {
        redirect_response(StatusCode::FOUND, &self.base_path, Vec::new())
    }

    pub(crate) fn logout(&self) -> Vec<HeaderValue> {
        match self.csrf.clear_cookie() {
            Ok(cookie) => vec![cookie],
            Err(err) => {
                error!(error = %err, "failed to build csrf cookie");
                Vec::new()
            }
        }
    }
}
