use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use harvester_common::{coordinator::CoordinatorCommand, error::Error, state::DatabaseTrait};
use harvester_connector::Connectors;
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    auth::{JwtKeys, require_bearer},
    handlers::{datasources, executions, health, stats, tasks},
};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) db: Arc<dyn DatabaseTrait>,
    pub(crate) coordinator_cmd_tx: mpsc::Sender<CoordinatorCommand>,
    pub(crate) connectors: Connectors,
    pub(crate) jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn new(
        db: Arc<dyn DatabaseTrait>,
        coordinator_cmd_tx: mpsc::Sender<CoordinatorCommand>,
        connectors: Connectors,
        jwt_secret: &str,
    ) -> Self {
        Self {
            db,
            coordinator_cmd_tx,
            connectors,
            jwt: Arc::new(JwtKeys::new(jwt_secret)),
        }
    }
}

/// Builds the full route table.
/// ---
/// `/healthz` and `/readyz` are public, everything under `/api/v1`
/// requires a bearer token.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/tasks/{id}",
            get(tasks::get).put(tasks::update).delete(tasks::delete),
        )
        .route("/tasks/{id}/run", post(tasks::run))
        .route("/tasks/{id}/stop", post(tasks::stop))
        .route("/tasks/{id}/execute", post(tasks::execute))
        .route("/tasks/{id}/data", get(tasks::data))
        .route(
            "/datasources",
            get(datasources::list).post(datasources::create),
        )
        .route(
            "/datasources/{id}",
            get(datasources::get)
                .put(datasources::update)
                .delete(datasources::delete),
        )
        .route("/datasources/{id}/test", post(datasources::test))
        .route("/datasources/{id}/preview", post(datasources::preview))
        .route("/executions", get(executions::list))
        .route("/executions/{id}", get(executions::get))
        .route("/executions/task/{task_id}", get(executions::list_for_task))
        .route("/stats/overview", get(stats::overview))
        .route("/stats/tasks", get(stats::per_task))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.jwt),
            require_bearer,
        ));

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub struct ApiServer {
    state: AppState,
    listen_addr: SocketAddr,
}

impl ApiServer {
    pub fn new(state: AppState, listen_addr: SocketAddr) -> Self {
        Self { state, listen_addr }
    }

    /// Binds the listener and serves until `shutdown` fires.
    /// ---
    /// The bind happens before spawning so an occupied port fails startup
    /// instead of surfacing later as a finished server task.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>, Error> {
        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            Error::Internal(format!(
                "Failed to bind REST API listener on {}: {}",
                self.listen_addr, e
            ))
        })?;

        let app = router(self.state.clone());
        let listen_addr = self.listen_addr;

        let handle = tokio::spawn(async move {
            info!("REST API listening on http://{}", listen_addr);

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;

            match result {
                Ok(()) => info!("REST API server stopped gracefully."),
                Err(e) => error!("REST API server encountered an error: {}", e),
            }
        });

        Ok(handle)
    }
}
