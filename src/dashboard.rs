//! # Dashboard — HTTP Transport for the Pipeline Core
//!
//! A thin Axum adapter over the four pure pipeline stages (`clean`,
//! `duration`, `sequence`, `critical`). Every handler: parses the request
//! body into a `serde_json::Value`, acquires the per-working-directory
//! lock, calls the matching `pipeline::run_*` function, and maps the
//! result (or `AppError`) straight to a JSON response. No business logic
//! lives here — see `pipeline.rs` for that.
//!
//! ## Endpoints
//!
//! - `GET /health`, `/healthz`, `/readyz` — liveness/readiness, no body.
//! - `POST /v1/clean` — array of records, or `{activities|data, dependencies?}`.
//! - `POST /v1/duration` — body ignored; reads the prior clean output.
//! - `POST /v1/sequence` — no body; reads the prior duration output.
//! - `POST /v1/critical` — array of extras, or `{output|activities}`.
//!
//! ## Concurrency
//!
//! `AppState` holds one `tokio::sync::Mutex<()>` per process, serializing
//! writes to the configured working directory across concurrent requests
//! (spec.md §5) — acquired for the whole stage call via a scoped
//! `.lock().await` guard, released on every exit path including errors.

use crate::error::AppResult;
use crate::pipeline;
use crate::store::WorkingDir;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use std::time::Duration;

/// 64 MiB — CAD extracts can carry thousands of records with verbose
/// geometry keys; generous but bounded.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub struct AppState {
    pub data_dir: PathBuf,
    pub lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(data_dir: PathBuf) -> Self {
        AppState { data_dir, lock: tokio::sync::Mutex::new(()) }
    }
}

/// Build the Axum router. Split out from `run` so tests can exercise it
/// in-process via `tower::ServiceExt::oneshot` without binding a socket.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(health))
        .route("/v1/clean", post(clean))
        .route("/v1/duration", post(duration))
        .route("/v1/sequence", post(sequence))
        .route("/v1/critical", post(critical))
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on `port`, persisting pipeline artifacts under
/// `data_dir`.
pub async fn run(port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    WorkingDir::new(&data_dir)?;
    let state = Arc::new(AppState::new(data_dir));
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "cadsched dashboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn clean(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> AppResult<Json<Value>> {
    let _guard = state.lock.lock().await;
    let wd = WorkingDir::new(&state.data_dir)?;
    let result = pipeline::run_clean(&wd, &body)?;
    Ok(Json(result))
}

async fn duration(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> AppResult<Json<Value>> {
    let _ = body; // the stage reads the prior clean artifact; the body is ignored per spec.md §6
    let _guard = state.lock.lock().await;
    let wd = WorkingDir::new(&state.data_dir)?;
    let result = pipeline::run_duration(&wd)?;
    Ok(Json(result))
}

async fn sequence(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> AppResult<Json<Value>> {
    let _ = body; // no body per spec.md §6; the stage reads the prior duration artifact
    let _guard = state.lock.lock().await;
    let wd = WorkingDir::new(&state.data_dir)?;
    let result = pipeline::run_sequence(&wd)?;
    Ok(Json(result))
}

async fn critical(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> AppResult<Json<Value>> {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let _guard = state.lock.lock().await;
    let wd = WorkingDir::new(&state.data_dir)?;
    let result = pipeline::run_critical(&wd, &body)?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(dir.path().to_path_buf()));
        (state, dir)
    }

    async fn call(router: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn health_ok() {
        let (state, _dir) = test_state();
        let app = router(state);
        let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duration_without_clean_returns_404() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, _) = call(app, "POST", "/v1/duration", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_pipeline_through_http() {
        let (state, _dir) = test_state();
        let app = router(state);

        let records = json!([
            {
                "Element Name": "CWA_ASU-1A01_Install_Concrete",
                "Category/Class": "Layer"
            },
            {
                "Element Name": "CWA_ASU-1A01_Install_Concrete",
                "Category/Class": "3D Solid",
                "AutoCAD Geometry.Position X": 0.0,
                "AutoCAD Geometry.Position Y": 0.0,
                "AutoCAD Geometry.Position Z": 0.0,
                "AutoCAD Geometry.Length": 4.0,
                "AutoCAD Geometry.Width": 4.0,
                "AutoCAD Geometry.Height": 0.5
            }
        ]);
        let (status, body) = call(app.clone(), "POST", "/v1/clean", records).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], json!(1));

        let (status, _) = call(app.clone(), "POST", "/v1/duration", Value::Null).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(app.clone(), "POST", "/v1/sequence", Value::Null).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(app, "POST", "/v1/critical", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_clean_body_returns_422() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, _) = call(app, "POST", "/v1/clean", json!(["not an object"])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
