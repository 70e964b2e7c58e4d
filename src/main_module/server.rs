//! HTTP server initialization and routing

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{middleware, routing::get, Router};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::configure_audit_routes;
use crate::core::shared::state::AppState;
use crate::marketplace::configure_marketplace_routes;
use crate::messages::configure_messages_routes;
use crate::security::auth_api::{auth_middleware, configure_auth_routes};
use crate::teams::configure_teams_routes;
use crate::testdata::{configure_testdata_routes, CRON_SECRET_HEADER};
use crate::tickets::configure_tickets_routes;
use crate::users::configure_users_routes;

use super::{health_check, health_check_simple};

/// Permissive when no origins are configured.
pub fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        if !allowed_origins.is_empty() {
            warn!("No valid CORS origin in configuration, allowing any origin");
        }
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CRON_SECRET_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health_check_simple))
        .route("/api/health", get(health_check))
        .merge(configure_auth_routes())
        .merge(configure_tickets_routes())
        .merge(configure_messages_routes())
        .merge(configure_users_routes())
        .merge(configure_teams_routes())
        .merge(configure_audit_routes())
        .merge(configure_marketplace_routes())
        .merge(configure_testdata_routes());

    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    api.layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

pub async fn run_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let host = app_state.config.server.host.clone();
    let port = app_state.config.server.port;
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let app = build_router(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}
