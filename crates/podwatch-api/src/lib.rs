//! podwatch-api: REST API for a node's reality and health.
//!
//! Lets operators and schedulers declare which services should run on a
//! node and read back the health the agent publishes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/nodes/:node/reality` | List desired services |
//! | GET | `/api/v1/nodes/:node/reality/:service` | Get one desired service |
//! | PUT | `/api/v1/nodes/:node/reality/:service` | Declare a service |
//! | DELETE | `/api/v1/nodes/:node/reality/:service` | Remove a service |
//! | GET | `/api/v1/nodes/:node/health` | List health results |
//! | GET | `/api/v1/nodes/:node/health/:service` | Get one health result |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use podwatch_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the API router.
pub fn build_router(store: StateStore) -> Router {
    let api_state = ApiState { store };

    let api_routes = Router::new()
        .route("/nodes/{node}/reality", get(handlers::list_reality))
        .route(
            "/nodes/{node}/reality/{service}",
            get(handlers::get_reality)
                .put(handlers::put_reality)
                .delete(handlers::delete_reality),
        )
        .route("/nodes/{node}/health", get(handlers::list_health))
        .route("/nodes/{node}/health/{service}", get(handlers::get_health))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
