//! Double-submit-cookie CSRF protection.
//!
//! A random token is stored in the `csrf-token` cookie, which is readable by the
//! frontend. Any request with a non-safe method must echo it in the
//! `X-CSRFToken` header. Browsers cannot set custom headers on WebSocket
//! handshakes, so upgrades are additionally checked for a same-origin
//! `Origin`/`Referer`.

use super::cookies::{
    CSRF_COOKIE_NAME, CSRF_HEADER_NAME, CookieAttributes, SameSite, clear_cookie, cookie_value,
    set_cookie,
};
use anyhow::Context;
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method,
    header::{CONNECTION, ORIGIN, REFERER, UPGRADE},
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;

/// Random bytes behind each CSRF token.
const CSRF_TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("missing Origin and Referer headers")]
    MissingOrigin,

    #[error("invalid request origin")]
    InvalidOrigin,

    #[error("missing csrf cookie")]
    MissingCookie,

    #[error("csrf token mismatch")]
    TokenMismatch,
}

#[derive(Debug, Clone)]
pub struct CsrfVerifier {
    base_url: Url,
    cookie_path: String,
    secure: bool,
}

impl CsrfVerifier {
    /// Create a verifier bound to the public base URL of the console.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        let cookie_path = base_url.path().to_string();
        let secure = base_url.scheme() == "https";
        Self {
            base_url,
            cookie_path,
            secure,
        }
    }

    /// Check a request for CSRF.
    ///
    /// # Errors
    /// Returns the first failed check.
    pub fn verify(&self, method: &Method, headers: &HeaderMap) -> Result<(), CsrfError> {
        if is_websocket_upgrade(headers) {
            self.verify_source_origin(headers)?;
        }

        if is_safe_method(method) {
            return Ok(());
        }

        verify_token(headers)
    }

    /// Check that a request comes from the configured origin.
    ///
    /// `Origin` is preferred over `Referer`. Scheme, host and port must match the
    /// base URL; a `Referer` path must also live under the base path.
    ///
    /// # Errors
    /// Returns [`CsrfError::MissingOrigin`] when neither header is present and
    /// [`CsrfError::InvalidOrigin`] when the source does not match.
    pub fn verify_source_origin(&self, headers: &HeaderMap) -> Result<(), CsrfError> {
        let header_str = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let (source, is_referer) = match (header_str(ORIGIN), header_str(REFERER)) {
            (Some(origin), _) => (origin, false),
            (None, Some(referer)) => (referer, true),
            (None, None) => return Err(CsrfError::MissingOrigin),
        };

        let source = Url::parse(source).map_err(|_| CsrfError::InvalidOrigin)?;

        if source.scheme() != self.base_url.scheme()
            || source.host_str() != self.base_url.host_str()
            || source.port_or_known_default() != self.base_url.port_or_known_default()
        {
            return Err(CsrfError::InvalidOrigin);
        }

        if is_referer && !source.path().starts_with(self.base_url.path()) {
            return Err(CsrfError::InvalidOrigin);
        }

        Ok(())
    }

    /// `Set-Cookie` value carrying a fresh CSRF token.
    ///
    /// # Errors
    /// Returns an error if the random source fails.
    pub fn issue_cookie(&self) -> anyhow::Result<HeaderValue> {
        let token = super::random_token(CSRF_TOKEN_BYTES)?;
        set_cookie(CSRF_COOKIE_NAME, &token, &self.attributes())
            .context("failed to build csrf cookie")
    }

    /// `Set-Cookie` value expiring the CSRF cookie.
    ///
    /// # Errors
    /// Returns an error if the cookie path is not a valid header value.
    pub fn clear_cookie(&self) -> anyhow::Result<HeaderValue> {
        clear_cookie(CSRF_COOKIE_NAME, &self.attributes()).context("failed to build csrf cookie")
    }

    /// Whether the request already carries a CSRF cookie.
    #[must_use]
    pub fn has_cookie(headers: &HeaderMap) -> bool {
        cookie_value(headers, CSRF_COOKIE_NAME).is_some_and(|value| !value.is_empty())
    }

    fn attributes(&self) -> CookieAttributes<'_> {
        CookieAttributes {
            path: &self.cookie_path,
            secure: self.secure,
            http_only: false,
            same_site: SameSite::Strict,
            max_age: None,
        }
    }
}

fn verify_token(headers: &HeaderMap) -> Result<(), CsrfError> {
    let cookie = cookie_value(headers, CSRF_COOKIE_NAME).ok_or(CsrfError::MissingCookie)?;
    let token = headers
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if tokens_match(token, &cookie) {
        Ok(())
    } else {
        Err(CsrfError::TokenMismatch)
    }
}

/// Constant-time comparison; two empty tokens never match.
#[must_use]
pub fn tokens_match(token: &str, cookie: &str) -> bool {
    if token.is_empty() || cookie.is_empty() {
        return false;
    }
    token.as_bytes().ct_eq(cookie.as_bytes()).into()
}

#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[must_use]
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn verifier() -> CsrfVerifier {
        CsrfVerifier::new(Url::parse("https://example.com/asdf/").unwrap())
    }

    fn with_tokens(header: Option<&str>, cookie: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(header) = header {
            headers.insert(CSRF_HEADER_NAME, HeaderValue::from_str(header).unwrap());
        }
        if let Some(cookie) = cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("{CSRF_COOKIE_NAME}={cookie}")).unwrap(),
            );
        }
        headers
    }

    fn with_header(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn token_cases() {
        let verifier = verifier();
        let cases = [
            (Some("a"), Some("a"), Ok(())),
            (Some("a"), Some("b"), Err(CsrfError::TokenMismatch)),
            (Some("a"), Some(""), Err(CsrfError::TokenMismatch)),
            (Some(""), Some("a"), Err(CsrfError::TokenMismatch)),
            (Some(""), Some(""), Err(CsrfError::TokenMismatch)),
            (None, Some("a"), Err(CsrfError::TokenMismatch)),
            (Some("a"), None, Err(CsrfError::MissingCookie)),
        ];
        for (header, cookie, expected) in cases {
            let headers = with_tokens(header, cookie);
            assert_eq!(
                verifier.verify(&Method::POST, &headers),
                expected,
                "header={header:?} cookie={cookie:?}"
            );
        }
    }

    #[test]
    fn safe_methods_skip_token_check() {
        let verifier = verifier();
        let headers = HeaderMap::new();
        for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE] {
            assert_eq!(verifier.verify(&method, &headers), Ok(()), "{method}");
        }
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert_eq!(
                verifier.verify(&method, &headers),
                Err(CsrfError::MissingCookie),
                "{method}"
            );
        }
    }

    #[test]
    fn referer_under_base_path_is_accepted() {
        let verifier = verifier();
        for referer in [
            "https://example.com/asdf/",
            "https://example.com/asdf/foo/bar",
            "https://example.com:443/asdf/k8s",
        ] {
            assert_eq!(
                verifier.verify_source_origin(&with_header(REFERER, referer)),
                Ok(()),
                "{referer}"
            );
        }
    }

    #[test]
    fn referer_mismatches_are_rejected() {
        let verifier = verifier();
        for referer in [
            "http://example.com/asdf/",
            "https://google.com/asdf/",
            "https://example.com:8443/asdf/",
            "https://example.com/",
            "https://example.com/other/",
            "not a url",
        ] {
            assert_eq!(
                verifier.verify_source_origin(&with_header(REFERER, referer)),
                Err(CsrfError::InvalidOrigin),
                "{referer}"
            );
        }
    }

    #[test]
    fn origin_has_no_path_requirement() {
        let verifier = verifier();
        assert_eq!(
            verifier.verify_source_origin(&with_header(ORIGIN, "https://example.com")),
            Ok(())
        );
        assert_eq!(
            verifier.verify_source_origin(&with_header(ORIGIN, "https://evil.example.com")),
            Err(CsrfError::InvalidOrigin)
        );
        assert_eq!(
            verifier.verify_source_origin(&with_header(ORIGIN, "null")),
            Err(CsrfError::InvalidOrigin)
        );
    }

    #[test]
    fn origin_takes_precedence_over_referer() {
        let verifier = verifier();
        let mut headers = with_header(ORIGIN, "https://google.com");
        headers.insert(REFERER, HeaderValue::from_static("https://example.com/asdf/"));
        assert_eq!(
            verifier.verify_source_origin(&headers),
            Err(CsrfError::InvalidOrigin)
        );
    }

    #[test]
    fn missing_origin_and_referer() {
        assert_eq!(
            verifier().verify_source_origin(&HeaderMap::new()),
            Err(CsrfError::MissingOrigin)
        );
    }

    #[test]
    fn websocket_upgrade_checks_origin_even_for_get() {
        let verifier = verifier();
        let mut headers = with_header(UPGRADE, "websocket");
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_websocket_upgrade(&headers));
        assert_eq!(
            verifier.verify(&Method::GET, &headers),
            Err(CsrfError::MissingOrigin)
        );

        headers.insert(ORIGIN, HeaderValue::from_static("https://example.com"));
        assert_eq!(verifier.verify(&Method::GET, &headers), Ok(()));
    }

    #[test]
    fn issued_cookie_is_readable_by_frontend() -> anyhow::Result<()> {
        let cookie = verifier().issue_cookie()?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("csrf-token="));
        assert!(cookie.contains("Path=/asdf/"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(!cookie.contains("HttpOnly"));
        Ok(())
    }

    #[test]
    fn plain_http_cookie_is_not_secure() -> anyhow::Result<()> {
        let verifier = CsrfVerifier::new(Url::parse("http://localhost:9000/")?);
        let cookie = verifier.issue_cookie()?;
        assert!(!cookie.to_str()?.contains("Secure"));
        Ok(())
    }
}
