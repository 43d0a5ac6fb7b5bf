use crate::error::AppError;
use crate::http::schemas::*;
use crate::session::{ProcessSnapshot, SessionManager};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use std::convert::Infallible;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub fn router(manager: SessionManager) -> Router {
    Router::new()
        .route("/api/execute", post(execute))
        .route("/api/stop", post(stop_by_name))
        .route("/api/processes", get(list_processes))
        .route("/api/processes/:pid/kill", post(kill_process))
        .route("/api/kill-all", post(kill_all))
        .route("/api/status", get(status))
        .route("/api/logs", get(logs))
        .with_state(manager)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[instrument(skip(manager, params), fields(command = %params.command))]
async fn execute(
    State(manager): State<SessionManager>,
    Json(params): Json<ExecuteParams>,
) -> Result<Response, AppError> {
    if params.command.trim().is_empty() {
        return Err(AppError::InvalidInputArgument("No command provided".to_string()));
    }

    let body = match manager.execute(&params.command, params.cwd.as_deref()) {
        Ok(streamer) => {
            info!(pid = streamer.pid(), "Streaming command output");
            let chunks = streamer
                .into_stream()
                .map(|line| Ok::<_, Infallible>(line.to_chunk()));
            Body::from_stream(chunks)
        }
        Err(e) if e.is_spawn_rejection() => Body::from(format!("Error: {}\n", e)),
        Err(e) => return Err(e),
    };
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}

async fn stop_by_name(
    State(manager): State<SessionManager>,
    Json(params): Json<StopParams>,
) -> Result<Json<StopResult>, AppError> {
    if params.name.is_empty() {
        return Err(AppError::InvalidInputArgument("No process name provided".to_string()));
    }
    let ids = tokio::task::spawn_blocking(move || manager.terminate_by_command_substring(&params.name)).await?;
    Ok(Json(StopResult {
        success: !ids.is_empty(),
        count: ids.len(),
        ids: ids.into_iter().collect(),
    }))
}

async fn kill_process(
    State(manager): State<SessionManager>,
    Path(pid): Path<u32>,
) -> Result<Json<KillProcessResult>, AppError> {
    let success = tokio::task::spawn_blocking(move || manager.terminate_by_id(pid)).await?;
    Ok(Json(KillProcessResult { success }))
}

async fn kill_all(State(manager): State<SessionManager>) -> Result<Json<KillAllResult>, AppError> {
    let swept = tokio::task::spawn_blocking(move || manager.terminate_all()).await?;
    Ok(Json(KillAllResult { count: swept.len() }))
}

async fn list_processes(
    State(manager): State<SessionManager>,
) -> Result<Json<Vec<ProcessSnapshot>>, AppError> {
    let snapshots = tokio::task::spawn_blocking(move || manager.list_active()).await?;
    Ok(Json(snapshots))
}

async fn status(State(manager): State<SessionManager>) -> Result<Json<StatusResult>, AppError> {
    let logs = manager.log().len();
    let tracked = manager.registry().len();
    let running = tokio::task::spawn_blocking(move || manager.running_count()).await?;
    Ok(Json(StatusResult { running, tracked, logs }))
}

async fn logs(State(manager): State<SessionManager>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], manager.log().render())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::utils::log_sink::LogSink;
    use serde_json::{json, Value};
    use std::sync::Arc;

    async fn start_server() -> (String, SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let config = Config::from_lookup(|key| (key == "WORKING_DIR").then(|| root.clone())).unwrap();
        let manager = SessionManager::new(Arc::new(config), LogSink::new(1000)).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(manager.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), manager, dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execute_streams_plain_text_with_trailer() {
        let (base, manager, _dir) = start_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/execute", base))
            .json(&json!({ "command": "echo hi" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(response.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = response.text().await.unwrap();
        assert_eq!(body, "hi\n\n[Process completed with exit code: 0]\n");
        assert!(manager.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execute_reports_spawn_failure_as_single_line() {
        let (base, manager, _dir) = start_server().await;
        let body = reqwest::Client::new()
            .post(format!("{}/api/execute", base))
            .json(&json!({ "command": "echo hi", "cwd": "missing-dir" }))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.starts_with("Error: "));
        assert_eq!(body.lines().count(), 1);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_command_is_a_bad_request() {
        let (base, _manager, _dir) = start_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/execute", base))
            .json(&json!({ "command": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn process_management_endpoints() {
        let (base, manager, _dir) = start_server().await;
        let client = reqwest::Client::new();
        let first = manager.execute("sleep 30; echo job.py", None).unwrap();
        let second = manager.execute("sleep 30", None).unwrap();
        let _third = manager.execute("sleep 31", None).unwrap();

        let listed: Vec<Value> = client
            .get(format!("{}/api/processes", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|p| p["status"] == "running"));

        let status: Value = client.get(format!("{}/api/status", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(status["running"], 3);
        assert_eq!(status["tracked"], 3);

        let stopped: Value = client
            .post(format!("{}/api/stop", base))
            .json(&json!({ "name": "job.py" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["success"], true);
        assert_eq!(stopped["count"], 1);
        assert_eq!(stopped["ids"][0], first.pid());

        let missing: Value = client
            .post(format!("{}/api/stop", base))
            .json(&json!({ "name": "job.py" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(missing["success"], false);
        assert_eq!(missing["count"], 0);

        let killed: Value = client
            .post(format!("{}/api/processes/{}/kill", base, second.pid()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(killed["success"], true);

        let swept: Value = client.post(format!("{}/api/kill-all", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(swept["count"], 1);
        assert!(manager.registry().is_empty());

        let logs = client.get(format!("{}/api/logs", base)).send().await.unwrap().text().await.unwrap();
        assert!(logs.contains("[COMMAND]"));
        assert!(logs.contains("[SYSTEM] Killed all tracked processes (1)"));
    }
}
