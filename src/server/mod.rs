//! HTTP API for submitting adjustments and browsing variation history.
//!
//! Submissions only enqueue; the worker pool does the processing. Errors
//! are RFC 7807 problem documents.

mod handlers;
mod problem;
mod routes;

pub use problem::Problem;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::orchestrator::AdjustmentOrchestrator;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AdjustmentOrchestrator>,
    /// Provider chain in call order, reported by `/health`.
    pub providers: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<AdjustmentOrchestrator>, providers: Vec<String>) -> Self {
        Self {
            orchestrator,
            providers: Arc::new(providers),
        }
    }
}

/// Serve until `shutdown` turns true.
pub async fn serve(
    state: AppState,
    bind: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::testing::{heuristic_orchestrator, TestEnv};

    async fn setup_test_app() -> (axum::Router, TestEnv) {
        let env = heuristic_orchestrator().await;
        let state = AppState::new(env.orchestrator.clone(), vec!["heuristic".to_string()]);
        (create_router(state), env)
    }

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Option<String>, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, content_type, json)
    }

    fn submission() -> serde_json::Value {
        serde_json::json!({
            "saved_recipe_id": "saved-1",
            "feedback_id": "fb-1",
            "snapshot": {"text": "Way too salty"}
        })
    }

    #[tokio::test]
    async fn test_health_reports_providers() {
        let (app, _env) = setup_test_app().await;
        let (status, _, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"][0], "heuristic");
    }

    #[tokio::test]
    async fn test_submit_is_accepted_and_second_conflicts() {
        let (app, _env) = setup_test_app().await;
        let (status, _, body) = send(&app, "POST", "/api/adjustments", Some(submission())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        let request_id = body["request_id"].as_str().unwrap().to_string();

        let (status, content_type, body) =
            send(&app, "POST", "/api/adjustments", Some(submission())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(content_type.as_deref(), Some("application/problem+json"));
        assert_eq!(
            body["type"],
            "https://api.naecipe.com/errors/adjustment-in-progress"
        );
        assert_eq!(body["request_id"], request_id.as_str());
    }

    #[tokio::test]
    async fn test_result_is_conflict_until_completed() {
        let (app, env) = setup_test_app().await;
        let (_, _, body) = send(&app, "POST", "/api/adjustments", Some(submission())).await;
        let request_id = body["request_id"].as_str().unwrap().to_string();

        let uri = format!("/api/adjustments/{}/result", request_id);
        let (status, _, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "pending");

        env.orchestrator.drain("test-worker").await.unwrap();

        let (status, _, variation) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(variation["version_number"], 1);
        assert_eq!(variation["is_active"], true);

        let (status, _, view) =
            send(&app, "GET", &format!("/api/adjustments/{}", request_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["status"], "completed");
        assert_eq!(view["provider_used"], "heuristic");
        assert!(view.get("input_snapshot").is_none());

        let (_, _, history) = send(
            &app,
            "GET",
            &format!("/api/adjustments/{}/history", request_id),
            None,
        )
        .await;
        let last = history.as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["to_status"], "completed");
    }

    #[tokio::test]
    async fn test_version_endpoints() {
        let (app, env) = setup_test_app().await;
        send(&app, "POST", "/api/adjustments", Some(submission())).await;
        env.orchestrator.drain("test-worker").await.unwrap();

        let (status, _, versions) =
            send(&app, "GET", "/api/saved-recipes/saved-1/versions", None).await;
        assert_eq!(status, StatusCode::OK);
        let version_id = versions[0]["id"].as_str().unwrap().to_string();

        let (status, _, active) =
            send(&app, "GET", "/api/saved-recipes/saved-1/active", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(active["id"], version_id.as_str());

        let (status, _, diff) = send(
            &app,
            "GET",
            &format!("/api/saved-recipes/saved-1/versions/{}/diff", version_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!diff["changes"].as_array().unwrap().is_empty());

        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/api/saved-recipes/saved-1/versions/{}/rollback", version_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_problem_404() {
        let (app, _env) = setup_test_app().await;
        let (status, content_type, body) =
            send(&app, "GET", "/api/adjustments/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(content_type.as_deref(), Some("application/problem+json"));
        assert_eq!(body["status"], 404);

        let (status, _, _) = send(&app, "GET", "/api/saved-recipes/saved-1/active", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/saved-recipes/saved-1/versions/nope/activate",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_then_retry() {
        let (app, _env) = setup_test_app().await;
        let (_, _, body) = send(&app, "POST", "/api/adjustments", Some(submission())).await;
        let request_id = body["request_id"].as_str().unwrap().to_string();

        let (status, _, body) = send(
            &app,
            "POST",
            &format!("/api/adjustments/{}/cancel", request_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "cancelled");

        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/api/adjustments/{}/cancel", request_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, body) = send(
            &app,
            "POST",
            &format!("/api/adjustments/{}/retry", request_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_ne!(body["request_id"], request_id.as_str());
    }
}
