//! Admin API.
//!
//! Read-only views of the daemon plus forced status and reload, all behind
//! a bearer token.

pub mod auth;
pub mod handlers;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::daemon::Daemon;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use crate::lifecycle::ShutdownListener;
use tower_http::trace::TraceLayer;

/// State injected into admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub daemon: Arc<Daemon>,
    /// File re-read by `POST /admin/reload`.
    pub config_path: Option<PathBuf>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/groups", get(get_groups))
        .route("/admin/groups/{name}", get(get_group))
        .route("/admin/checks", get(get_checks))
        .route("/admin/dns", get(get_dns))
        .route("/admin/force", post(post_force))
        .route("/admin/reload", post(post_reload))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown is triggered.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: ShutdownListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
