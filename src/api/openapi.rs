use crate::api::handlers::{auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that drives the `OpenAPI` document.
///
/// Console routes are documented relative to the base path. The proxied
/// cluster API and `OPTIONS /health` are not documented.
fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .merge(health_routes())
        .merge(public_routes())
        .merge(protected_routes());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());
    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Console login, logout and session state".to_string());
    router.get_openapi_mut().tags = Some(vec![health_tag, auth_tag]);

    router
}

pub(crate) fn health_routes() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(health::health))
}

/// Routes reachable without a session.
pub(crate) fn public_routes() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(auth::login))
        .routes(routes!(auth::callback, auth::callback_form))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::error_page))
}

/// Routes behind the auth gateway.
pub(crate) fn protected_routes() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(auth::whoami))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            optional_str(name),
            optional_str(email.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Jane Doe <jane@example.test>"),
            (Some("Jane Doe"), Some("jane@example.test"))
        );
        assert_eq!(parse_author("Bridge Developers"), (Some("Bridge Developers"), None));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn openapi_documents_console_routes() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in [
            "/health",
            "/auth/login",
            "/auth/callback",
            "/auth/logout",
            "/error",
            "/api/whoami",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(!doc.paths.paths.keys().any(|path| path.contains("kubernetes")));
    }

    #[test]
    fn form_post_callback_documents_its_body() {
        let doc = openapi();
        let body = doc
            .paths
            .paths
            .get("/auth/callback")
            .and_then(|item| item.post.as_ref())
            .and_then(|operation| operation.request_body.as_ref());
        assert!(body.is_some_and(|body| {
            body.content
                .contains_key("application/x-www-form-urlencoded")
        }));
        assert!(
            doc.components
                .is_some_and(|components| components.schemas.contains_key("CallbackParams"))
        );
    }

    #[test]
    fn openapi_license_comes_from_cargo() {
        let doc = openapi();
        let license = doc.info.license.map(|license| license.name);
        assert_eq!(license.as_deref(), optional_str(env!("CARGO_PKG_LICENSE")));
    }
}
