//! HTTP surface: router assembly and the listener.

use crate::{
    api::proxy::{ClusterProxy, KUBERNETES_PREFIX},
    auth::{AuthState, middleware::require_auth},
    tls::{self, TlsPaths},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{any, get},
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug, error, info, info_span};
use ulid::Ulid;

pub mod handlers;
mod openapi;
pub mod proxy;

pub use openapi::openapi;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router.
///
/// Console routes live under the configured base path; `/health` is always
/// served at the root.
#[must_use]
pub fn router(auth: Arc<AuthState>, proxy: Arc<ClusterProxy>) -> Router {
    let (public, _) = openapi::public_routes().split_for_parts();
    let (protected, _) = openapi::protected_routes().split_for_parts();

    let protected = protected
        .route(KUBERNETES_PREFIX, any(proxy::kubernetes))
        .route(&format!("{KUBERNETES_PREFIX}/{{*path}}"), any(proxy::kubernetes))
        .route_layer(from_fn_with_state(auth.clone(), require_auth));

    let console = public.merge(protected);
    let base_path = auth.base_path().trim_end_matches('/');
    let app = if base_path.is_empty() {
        console
    } else {
        Router::new().nest(base_path, console)
    };

    app.route("/health", get(handlers::health::health).options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CatchPanicLayer::new())
                .layer(Extension(auth))
                .layer(Extension(proxy)),
        )
}

/// Bind `[::]:port` and serve `app` until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if the listener cannot bind or the TLS material cannot be loaded.
pub async fn serve(port: u16, tls: Option<TlsPaths>, app: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    match tls {
        None => {
            info!("Listening on http://[::]:{}", port);
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Some(paths) => {
            let config = tls::load_server_config(&paths)?;
            info!("Listening on https://[::]:{}", port);
            serve_tls(listener, TlsAcceptor::from(Arc::new(config)), app).await;
        }
    }

    Ok(())
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("Failed to accept connection: {}", err);
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%peer, "TLS handshake failed: {}", err);
                    return;
                }
            };

            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, "Connection closed with error: {}", err);
            }
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
