//! HTTP view server.
//!
//! Runs a [`RefreshController`] in a background task and serves its latest
//! view model as JSON. The view is republished after activation and after
//! every polling pass.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/changesets` | Current [`ViewModel`] |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! All origins are permitted so a browser front-end can read the view.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::ops::ControlFlow;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::controller::RefreshController;
use crate::models::ViewModel;

#[derive(Clone)]
struct AppState {
    view: watch::Receiver<ViewModel>,
}

/// Build the router over a view channel.
pub fn router(view: watch::Receiver<ViewModel>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/changesets", get(handle_changesets))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { view })
}

/// Drive the controller and publish each new view into `tx`.
pub async fn drive(mut controller: RefreshController, tx: watch::Sender<ViewModel>) {
    if let Err(e) = controller.activate().await {
        tracing::warn!(error = %e, "activation failed");
    }
    tx.send_replace(controller.view());
    controller
        .run_polling(|view| {
            tx.send_replace(view.clone());
            ControlFlow::Continue(())
        })
        .await;
}

/// Bind to `bind` and serve until the process is terminated.
pub async fn run_server(bind: &str, controller: RefreshController) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(ViewModel::default());
    tokio::spawn(drive(controller, tx));

    let app = router(rx);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!("pushcov server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_changesets(State(state): State<AppState>) -> Json<ViewModel> {
    Json(state.view.borrow().clone())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
