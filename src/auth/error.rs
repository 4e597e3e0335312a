use super::{session::SessionError, verifier::IdTokenError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("identity provider error: {0}")]
    UpstreamIdp(String),

    #[error("invalid auth code URL: {0}")]
    InvalidAuthUrl(String),

    #[error("invalid login state")]
    InvalidLoginState,

    #[error("invalid id token: {0}")]
    IdToken(#[from] IdTokenError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short, non-sensitive code shown on the login error page.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::RefreshFailed(_) => "refresh",
            Self::UpstreamIdp(_) => "token_exchange",
            Self::InvalidAuthUrl(_) => "auth_url",
            Self::InvalidLoginState => "login_state",
            Self::IdToken(_) => "id_token",
            Self::Session(_) | Self::Internal(_) => "session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::InvalidLoginState.code(), "login_state");
        assert_eq!(
            AuthError::UpstreamIdp("boom".to_string()).code(),
            "token_exchange"
        );
        assert_eq!(AuthError::IdToken(IdTokenError::Expired).code(), "id_token");
        assert_eq!(AuthError::Session(SessionError::NotFound).code(), "session");
    }

    #[test]
    fn messages_are_lowercase() {
        assert_eq!(AuthError::Unauthenticated.to_string(), "unauthenticated");
        assert_eq!(
            AuthError::InvalidAuthUrl("no host".to_string()).to_string(),
            "invalid auth code URL: no host"
        );
    }
}
