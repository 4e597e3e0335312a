//! Cookie names and `Cookie`/`Set-Cookie` header helpers.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use thiserror::Error;

pub const SESSION_COOKIE_NAME: &str = "bridge-session-token";
pub const CSRF_COOKIE_NAME: &str = "csrf-token";
pub const LOGIN_STATE_COOKIE_NAME: &str = "bridge-login-state";
pub const CSRF_HEADER_NAME: &str = "x-csrftoken";

/// Longest value put in one cookie. Browsers drop cookies over 4 KiB,
/// name and attributes included.
pub const MAX_COOKIE_VALUE_LEN: usize = 3800;

/// Most cookies a single value may be split across.
pub const MAX_COOKIE_CHUNKS: usize = 8;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie value needs {0} chunks, at most {MAX_COOKIE_CHUNKS} are allowed")]
    TooLarge(usize),

    #[error(transparent)]
    Header(#[from] InvalidHeaderValue),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CookieAttributes<'a> {
    pub path: &'a str,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub max_age: Option<i64>,
}

/// Return the first value of the named cookie.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

/// Build a `Set-Cookie` header value.
///
/// # Errors
/// Returns an error if the value contains bytes not allowed in a header.
pub fn set_cookie(
    name: &str,
    value: &str,
    attributes: &CookieAttributes<'_>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path={}; SameSite={}",
        attributes.path,
        attributes.same_site.as_str()
    );
    if let Some(max_age) = attributes.max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age.max(0)));
    }
    if attributes.http_only {
        cookie.push_str("; HttpOnly");
    }
    if attributes.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a `Set-Cookie` header value that expires the named cookie.
///
/// # Errors
/// Returns an error if the path contains bytes not allowed in a header.
pub fn clear_cookie(
    name: &str,
    attributes: &CookieAttributes<'_>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let expired = CookieAttributes {
        max_age: Some(0),
        ..*attributes
    };
    set_cookie(name, "", &expired)
}

/// Name of the `index`-th chunk of a split cookie. The first chunk keeps the
/// plain name, later ones get `-1`, `-2` and so on.
#[must_use]
pub fn chunk_name(name: &str, index: usize) -> String {
    if index == 0 {
        name.to_string()
    } else {
        format!("{name}-{index}")
    }
}

/// Number of consecutive chunks of a split cookie present in the request.
#[must_use]
pub fn chunk_count(headers: &HeaderMap, name: &str) -> usize {
    (0..MAX_COOKIE_CHUNKS)
        .take_while(|index| cookie_value(headers, &chunk_name(name, *index)).is_some())
        .count()
}

/// Reassemble a value written with [`set_chunked_cookie`].
#[must_use]
pub fn chunked_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let count = chunk_count(headers, name);
    if count == 0 {
        return None;
    }
    (0..count)
        .map(|index| cookie_value(headers, &chunk_name(name, index)))
        .collect()
}

/// Build the `Set-Cookie` values carrying `value` split into chunks of at most
/// [`MAX_COOKIE_VALUE_LEN`] bytes. Chunks from `previous_chunks` that are no
/// longer needed are expired.
///
/// # Errors
/// Returns [`CookieError::TooLarge`] if more than [`MAX_COOKIE_CHUNKS`] chunks
/// would be needed, or an error if a header value is invalid.
pub fn set_chunked_cookie(
    name: &str,
    value: &str,
    attributes: &CookieAttributes<'_>,
    previous_chunks: usize,
) -> Result<Vec<HeaderValue>, CookieError> {
    let mut chunks = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut at = rest.len().min(MAX_COOKIE_VALUE_LEN);
        while !rest.is_char_boundary(at) {
            at -= 1;
        }
        let (chunk, tail) = rest.split_at(at);
        chunks.push(chunk);
        rest = tail;
    }
    if chunks.is_empty() {
        chunks.push("");
    }
    if chunks.len() > MAX_COOKIE_CHUNKS {
        return Err(CookieError::TooLarge(chunks.len()));
    }

    let mut cookies = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| set_cookie(&chunk_name(name, index), chunk, attributes))
        .collect::<Result<Vec<_>, _>>()?;
    for index in chunks.len()..previous_chunks {
        cookies.push(clear_cookie(&chunk_name(name, index), attributes)?);
    }
    Ok(cookies)
}

/// Expire the first `chunks` chunks of a split cookie, at least the first one.
///
/// # Errors
/// Returns an error if the path contains bytes not allowed in a header.
pub fn clear_chunked_cookie(
    name: &str,
    attributes: &CookieAttributes<'_>,
    chunks: usize,
) -> Result<Vec<HeaderValue>, InvalidHeaderValue> {
    (0..chunks.max(1))
        .map(|index| clear_cookie(&chunk_name(name, index), attributes))
        .collect()
}
