//! HTTP front door for todo commands.
//!
//! `POST {base}` create, `PUT {base}/{id}` update, `DELETE {base}/{id}`
//! delete, `GET {base}/health` liveness. Each write is validated,
//! published, and answered only once the broker acknowledged it.

mod config;
mod error;
mod middleware;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tokio_util::sync::CancellationToken;

use todo_pipeline::TodoCommands;

pub use config::HttpConfig;
pub use error::{ApiError, ServeError};

#[derive(Clone)]
pub struct AppState {
    commands: Arc<TodoCommands>,
    config: Arc<HttpConfig>,
}

impl AppState {
    pub fn new(commands: Arc<TodoCommands>, config: HttpConfig) -> Self {
        Self {
            commands,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

pub fn router(state: AppState) -> Router {
    let base = state.config.base_path();
    Router::new()
        .route(&base, post(routes::create_todo))
        // The static route wins, so `health` is not usable as a todo id.
        .route(&format!("{base}/health"), get(routes::health))
        .route(&format!("{base}/{{id}}"), put(routes::update_todo).delete(routes::delete_todo))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::deadline))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::access_log))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn run(state: AppState, shutdown: CancellationToken) -> Result<(), ServeError> {
    let port = state.config.port;
    let base = state.config.base_path();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| ServeError::Bind { port, source })?;

    tracing::info!(port, path = %base, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServeError::Serve)?;

    tracing::info!("http server stopped");
    Ok(())
}
