#![allow(clippy::unwrap_used)]

mod common;

use axum::{
    body::Body,
    http::{
        Request, StatusCode,
        header::{CONNECTION, COOKIE, ORIGIN, UPGRADE},
    },
};
use bridge::auth::{
    cookies::{CSRF_COOKIE_NAME, SESSION_COOKIE_NAME},
    session::Session,
    unix_now,
};
use common::{
    BASE_ADDRESS, Idp, cookie_value, oidc_options, sealed_session, send, session_codec,
    set_cookies,
};
use wiremock::MockServer;

fn whoami(cookies: &str) -> Request<Body> {
    Request::get("/api/whoami")
        .header(COOKIE, cookies)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn idle_session_is_rejected_and_its_cookie_cleared() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let mut setup = oidc_options(&idp, &cluster, "/");
    setup.options.inactivity_timeout_seconds = 300;
    let app = common::app(&setup.options);

    let cookie = sealed_session(&idp.id_token(3600), unix_now() - 301);
    let response = send(&app, whoami(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(
        set_cookies(response.headers()).iter().any(|cookie| {
            cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=;")) && cookie.contains("Max-Age=0")
        })
    );
}

#[tokio::test]
async fn tracked_session_is_resealed_on_each_request() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let mut setup = oidc_options(&idp, &cluster, "/");
    setup.options.inactivity_timeout_seconds = 300;
    let app = common::app(&setup.options);

    let before = unix_now() - 120;
    let cookie = sealed_session(&idp.id_token(3600), before);
    let response = send(&app, whoami(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let resealed = cookie_value(response.headers(), SESSION_COOKIE_NAME).unwrap();
    let session: Session = session_codec()
        .open_json(SESSION_COOKIE_NAME, &resealed)
        .unwrap();
    assert!(session.last_activity_at > before);
    assert_eq!(session.issued_at, before);
}

#[tokio::test]
async fn untracked_session_is_not_reissued() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let setup = oidc_options(&idp, &cluster, "/");
    let app = common::app(&setup.options);

    let cookie = sealed_session(&idp.id_token(3600), unix_now() - 120);
    let response = send(&app, whoami(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_value(response.headers(), SESSION_COOKIE_NAME).is_none());
}

#[tokio::test]
async fn websocket_upgrade_from_foreign_origin_is_rejected() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let setup = oidc_options(&idp, &cluster, "/");
    let app = common::app(&setup.options);

    let cookies = format!(
        "{}; {CSRF_COOKIE_NAME}=token",
        sealed_session(&idp.id_token(3600), unix_now())
    );
    let upgrade = |origin: Option<&str>| {
        let mut builder = Request::get("/api/kubernetes/api/v1/namespaces/default/pods?watch=true")
            .header(COOKIE, &cookies)
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "Upgrade");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = send(&app, upgrade(Some("https://evil.example.test"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, upgrade(None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, upgrade(Some(&format!("{BASE_ADDRESS}.evil.test")))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(cluster.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_outage_keeps_the_session() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let setup = oidc_options(&idp, &cluster, "/");
    let cookie = sealed_session(&idp.id_token(3600), unix_now());

    // Discovery and keys are gone, as after a restart while the provider is down.
    idp.server.reset().await;
    let app = common::app(&setup.options);
    let response = send(&app, whoami(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        !set_cookies(response.headers())
            .iter()
            .any(|cookie| cookie.starts_with(SESSION_COOKIE_NAME))
    );

    idp.mount_provider().await;
    let app = common::app(&setup.options);
    let response = send(&app, whoami(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn forged_id_token_still_ends_the_session() {
    let idp = Idp::start().await;
    let cluster = MockServer::start().await;
    let setup = oidc_options(&idp, &cluster, "/");
    let app = common::app(&setup.options);

    let mut id_token = idp.id_token(3600);
    id_token.push_str("tampered");
    let response = send(&app, whoami(&sealed_session(&id_token, unix_now()))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(
        set_cookies(response.headers())
            .iter()
            .any(|cookie| cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=;")))
    );
}
