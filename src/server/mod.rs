//! HTTP and WebSocket surface over the job registry.

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::registry::JobRegistry;
use api::AppState;

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dev = state.config.server.dev;
    let app = api::api_router().with_state(state);
    if dev { app.layer(CorsLayer::permissive()) } else { app }
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ScanConfig, registry: JobRegistry) -> Result<()> {
    for problem in config.validate() {
        warn!("config: {}", problem);
    }
    let addr = config.bind_addr();
    let state = Arc::new(AppState { registry, config });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "scan server listening");
    println!("coderef-scan running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C, shutting down");
        return;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::JobStatus;
    use crate::registry::EvictionPolicy;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            registry: JobRegistry::new(EvictionPolicy::default()),
            config: ScanConfig::default(),
        })
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_until_finished(state: &AppState, id: &str) {
        let job = state.registry.get(id).unwrap();
        let mut status = job.status_watch();
        tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state());
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_scan_rejects_empty_project_list() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post_json("/api/scan", serde_json::json!({"projectPaths": []})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("at least one project"));
    }

    #[tokio::test]
    async fn test_start_scan_then_query_snapshot_and_output() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("app.ts"), "export function main() {}\n").unwrap();
        let state = test_state();
        let app = build_router(Arc::clone(&state));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/scan",
                serde_json::json!({
                    "projectPaths": [project.path()],
                    "jobId": "job-http",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["jobId"], "job-http");

        wait_until_finished(&state, "job-http").await;

        let resp = app.clone().oneshot(get("/api/scan/job-http")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let snapshot = body_json(resp).await;
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["totalProjects"], 1);

        let resp = app.oneshot(get("/api/scan/job-http/output")).await.unwrap();
        let output = body_json(resp).await;
        let lines = output["lines"].as_array().unwrap();
        assert!(lines.iter().any(|l| l.as_str().unwrap().contains("Found 1 code elements")));
    }

    #[tokio::test]
    async fn test_generated_job_id_when_absent() {
        let project = tempfile::tempdir().unwrap();
        let app = build_router(test_state());
        let resp = app
            .oneshot(post_json(
                "/api/scan",
                serde_json::json!({"projectPaths": [project.path()]}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let id = body_json(resp).await["jobId"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_job_returns_not_found_with_hints() {
        let app = build_router(test_state());
        for uri in [
            "/api/scan/missing",
            "/api/scan/missing/output",
            "/api/scan/missing/stream",
        ] {
            let resp = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
            let body = body_json(resp).await;
            assert_eq!(body["jobId"], "missing");
            assert!(!body["hints"].as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_cancel_finished_job_conflicts() {
        let project = tempfile::tempdir().unwrap();
        let state = test_state();
        let app = build_router(Arc::clone(&state));
        app.clone()
            .oneshot(post_json(
                "/api/scan",
                serde_json::json!({"projectPaths": [project.path()], "jobId": "done"}),
            ))
            .await
            .unwrap();
        wait_until_finished(&state, "done").await;

        let resp = app
            .oneshot(post_json("/api/scan/done/cancel", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(
            state.registry.get("done").unwrap().status(),
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_selections_are_applied_per_project() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("app.py"), "def main():\n    pass\n").unwrap();
        let state = test_state();
        let app = build_router(Arc::clone(&state));
        let path = project.path().to_string_lossy().to_string();
        let mut selections = serde_json::Map::new();
        selections.insert(
            path.clone(),
            serde_json::json!({"runScan": true, "runGenerate": true}),
        );

        let resp = app
            .oneshot(post_json(
                "/api/scan",
                serde_json::json!({
                    "projectPaths": [path],
                    "selections": selections,
                    "jobId": "with-generate",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        wait_until_finished(&state, "with-generate").await;

        assert!(project.path().join(".coderef/index.json").is_file());
        assert!(project.path().join(".coderef/diagrams/dependencies.mmd").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duplicate_job_id_conflicts_while_unfinished() {
        let project = tempfile::tempdir().unwrap();
        let script = project.path().join("setup.sh");
        std::fs::write(&script, "exec sleep 30\n").unwrap();
        let mut config = ScanConfig::default();
        config.scaffold.script = script;
        config.scaffold.interpreter = Some("sh".to_string());
        let state = Arc::new(AppState {
            registry: JobRegistry::new(EvictionPolicy::default()),
            config,
        });
        let app = build_router(Arc::clone(&state));
        let path = project.path().to_string_lossy().to_string();
        let mut selections = serde_json::Map::new();
        selections.insert(path.clone(), serde_json::json!({"runScaffold": true}));
        let body = serde_json::json!({
            "projectPaths": [path],
            "selections": selections,
            "jobId": "dup",
        });

        let first = app.clone().oneshot(post_json("/api/scan", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let original = state.registry.get("dup").unwrap();

        let second = app.clone().oneshot(post_json("/api/scan", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert!(body_json(second).await["error"]
            .as_str()
            .unwrap()
            .contains("already running"));
        assert!(Arc::ptr_eq(&state.registry.get("dup").unwrap(), &original));

        let resp = app
            .oneshot(post_json("/api/scan/dup/cancel", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        wait_until_finished(&state, "dup").await;
        assert_eq!(original.status(), JobStatus::Cancelled);
    }
}
