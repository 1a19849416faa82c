//! HTTP route tree.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub mod maintenance;
pub mod runner;

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

/// `GET /healthz`.
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assemble the full router.
#[must_use]
pub fn build_router(maintenance_enabled: bool) -> Router<AppState> {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .merge(runner::router());
    if maintenance_enabled {
        router = router.merge(maintenance::router());
    }
    router
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use clawlets_core::{Engine, RecordingScheduler, SystemClock};
    use clawlets_store::{MemoryBlobStore, MemoryStore};
    use tower::ServiceExt;

    fn test_app(maintenance: bool) -> axum::Router {
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(SystemClock),
            Arc::new(RecordingScheduler::new()),
        );
        crate::app(engine, maintenance)
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let response = test_app(false)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn runner_routes_reject_missing_bearer() {
        let response = test_app(false)
            .oneshot(
                Request::post("/runner/jobs/lease-next")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"projectId": uuid::Uuid::new_v4()}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn maintenance_routes_are_gated() {
        let response = test_app(false)
            .oneshot(
                Request::post("/maintenance/retention/sweep")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = test_app(true)
            .oneshot(
                Request::post("/maintenance/retention/sweep")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

