//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use podwatch_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: StateError) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Reality ────────────────────────────────────────────────────

/// GET /api/v1/nodes/:node/reality
pub async fn list_reality(
    State(state): State<ApiState>,
    Path(node): Path<String>,
) -> impl IntoResponse {
    match state.store.list_reality(&node) {
        Ok(services) => ApiResponse::ok(services).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/nodes/:node/reality/:service
pub async fn get_reality(
    State(state): State<ApiState>,
    Path((node, service)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_reality(&node, &service) {
        Ok(Some(desc)) => ApiResponse::ok(desc).into_response(),
        Ok(None) => error_response("service not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// PUT /api/v1/nodes/:node/reality/:service
///
/// The service id in the path overrides any id in the body.
pub async fn put_reality(
    State(state): State<ApiState>,
    Path((node, service)): Path<(String, String)>,
    Json(mut desc): Json<ServiceDescriptor>,
) -> impl IntoResponse {
    desc.id = service;
    match state.store.put_reality(&node, &desc) {
        Ok(()) => {
            info!(%node, service = %desc.id, port = desc.status_port, "service declared");
            ApiResponse::ok(desc).into_response()
        }
        Err(e) => internal(e),
    }
}

/// DELETE /api/v1/nodes/:node/reality/:service
pub async fn delete_reality(
    State(state): State<ApiState>,
    Path((node, service)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.delete_reality(&node, &service) {
        Ok(true) => {
            info!(%node, %service, "service removed");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("service not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/v1/nodes/:node/health
pub async fn list_health(
    State(state): State<ApiState>,
    Path(node): Path<String>,
) -> impl IntoResponse {
    match state.store.list_health(&node) {
        Ok(results) => ApiResponse::ok(results).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/nodes/:node/health/:service
pub async fn get_health(
    State(state): State<ApiState>,
    Path((node, service)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_health(&node, &service) {
        Ok(Some(result)) => ApiResponse::ok(result).into_response(),
        Ok(None) => error_response("no health result", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::build_router;

    async fn call(
        router: axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = router.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn declare_list_and_remove_service() {
        let store = StateStore::open_in_memory().unwrap();
        let router = build_router(store.clone());

        let (status, body) = call(
            router.clone(),
            "PUT",
            "/api/v1/nodes/node-1/reality/web",
            Some(serde_json::json!({
                "id": "ignored",
                "status_port": 8080,
                "status_http": true,
                "manifest": { "launchables": {} }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], "web");

        let (status, body) = call(router.clone(), "GET", "/api/v1/nodes/node-1/reality", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["status_port"], 8080);

        let (status, _) = call(router.clone(), "GET", "/api/v1/nodes/node-1/reality/web", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(router.clone(), "DELETE", "/api/v1/nodes/node-1/reality/web", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.list_reality("node-1").unwrap().is_empty());

        let (status, body) = call(router, "DELETE", "/api/v1/nodes/node-1/reality/web", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn health_results_are_readable() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_health(&HealthResult {
                service: "web".to_string(),
                node: "node-1".to_string(),
                status: HealthStatus::Critical,
                output: "connection refused".to_string(),
                checked_at: 1000,
            })
            .unwrap();
        let router = build_router(store);

        let (status, body) = call(router.clone(), "GET", "/api/v1/nodes/node-1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["status"], "critical");

        let (status, body) = call(router.clone(), "GET", "/api/v1/nodes/node-1/health/web", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["output"], "connection refused");

        let (status, _) = call(router, "GET", "/api/v1/nodes/node-1/health/db", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
