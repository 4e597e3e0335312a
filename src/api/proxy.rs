//! Reverse proxy to the cluster API server.
//!
//! Requests under `{base}api/kubernetes/` are forwarded with the user's bearer
//! token. Browser credentials never reach the upstream.

use crate::auth::{
    User,
    cookies::CSRF_HEADER_NAME,
};
use anyhow::{Context, Result};
use axum::{
    body::{Body, HttpBody},
    extract::{Extension, Request},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{
            AUTHORIZATION, CONNECTION, COOKIE, HOST, PROXY_AUTHENTICATE,
            PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
        },
    },
    response::{IntoResponse, Response},
};
use reqwest::Client;
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, error, instrument};
use url::Url;

/// Prefix of the proxied routes, relative to the base path.
pub const KUBERNETES_PREFIX: &str = "/api/kubernetes";

const CONNECT_TIMEOUT_SECONDS: u64 = 10;

// Hop-by-hop headers are never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 7] = [
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

#[derive(Debug)]
pub struct ClusterProxy {
    endpoint: Url,
    client: Client,
}

impl ClusterProxy {
    /// # Errors
    /// Returns an error if the CA file cannot be loaded or the client cannot be built.
    pub fn new(endpoint: Url, ca_file: Option<&Path>) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .redirect(reqwest::redirect::Policy::none());

        if let Some(ca_file) = ca_file {
            builder = builder.add_root_certificate(crate::tls::load_reqwest_ca(ca_file)?);
        }

        let client = builder
            .build()
            .context("Failed to build cluster API HTTP client")?;

        Ok(Self { endpoint, client })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Map a proxied request path (already stripped of the base path) to the
    /// upstream URL.
    #[must_use]
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let rest = path.strip_prefix(KUBERNETES_PREFIX).unwrap_or(path);
        let rest = rest.trim_start_matches('/');

        let mut url = self.endpoint.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{rest}"));
        url.set_query(query);
        url
    }

    /// Forward a request on behalf of `user`.
    #[instrument(
        name = "proxy.forward",
        skip_all,
        fields(http.method = %request.method(), upstream = tracing::field::Empty)
    )]
    pub async fn forward(&self, user: &User, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(parts.uri.path(), parts.uri.query());
        tracing::Span::current().record("upstream", url.path());

        let mut headers = forwarded_request_headers(&parts.headers);
        match HeaderValue::from_str(&format!("Bearer {}", user.token())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(err) => {
                error!(error = %err, "user token is not a valid header value");
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
        }

        let has_body = !body.is_end_stream();
        let mut outbound = self.client.request(parts.method, url).headers(headers);
        if has_body {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outbound.send().await;

        let upstream = match upstream {
            Ok(upstream) => upstream,
            Err(err) => {
                error!(error = %err, "cluster API request failed");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        debug!(status = %upstream.status(), "cluster API responded");

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Headers sent upstream: everything except browser credentials, the CSRF
/// token and connection-specific headers.
#[must_use]
pub fn forwarded_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    for name in [COOKIE, AUTHORIZATION, HOST] {
        forwarded.remove(name);
    }
    forwarded.remove(CSRF_HEADER_NAME);
    forwarded
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = headers.clone();
    // Headers listed in `Connection` are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in HOP_BY_HOP.iter().chain(listed.iter()) {
        stripped.remove(name);
    }
    stripped.remove("keep-alive");
    stripped
}

/// Handler for every method under the Kubernetes prefix.
pub async fn kubernetes(
    Extension(proxy): Extension<Arc<ClusterProxy>>,
    user: User,
    request: Request,
) -> Response {
    proxy.forward(&user, request).await
}
