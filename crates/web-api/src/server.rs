use crate::{handlers, websocket};
use autotrader_orchestrator::{CycleDatabase, EngineHandle};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared by every handler.
pub struct AppState {
    pub engine: EngineHandle,
    pub database: CycleDatabase,
}

pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(engine: EngineHandle, database: CycleDatabase) -> Self {
        Self {
            state: Arc::new(AppState { engine, database }),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/status", get(handlers::status))
            .route("/api/engine/start", post(handlers::start))
            .route("/api/engine/stop", post(handlers::stop))
            .route("/api/engine/run-once", post(handlers::run_once))
            .route("/api/engine/close-all", post(handlers::close_all))
            .route("/api/engine/mode", put(handlers::set_mode))
            .route("/api/memory", get(handlers::memory))
            .route(
                "/api/instructions",
                get(handlers::instructions).put(handlers::save_instructions),
            )
            .route("/api/cycles", get(handlers::list_cycles))
            .route("/api/cycles/:cycle_id", get(handlers::get_cycle))
            .route("/api/equity", get(handlers::equity))
            .route("/ws", get(websocket::websocket_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the web server and serves until `shutdown` resolves.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
