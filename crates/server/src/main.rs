use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dataset_api::{
    apply_operation, clean_once, dataset_summary, export_dataset, reset_dataset, upload_dataset,
    ApiContext, DatasetStore, EXPORT_FILENAME, ONE_SHOT_FILENAME,
};
use serde::Deserialize;
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{
        CleanOptions, OperationRequest, OperationResult, ResetResponse, SummaryResponse,
        UploadResponse,
    },
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, Settings};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CleanQuery {
    filename: Option<String>,
    #[serde(default)]
    remove_duplicates: bool,
    #[serde(default)]
    fill_missing: bool,
    #[serde(default)]
    detect_outliers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_filter))
        .init();

    let state = AppState {
        api: ApiContext {
            store: DatasetStore::new(settings.max_sessions),
        },
    };
    let app = build_router(Arc::new(state), &settings);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, max_sessions = settings.max_sessions, "dataset server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, settings: &Settings) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/upload", post(upload))
        .route("/clean", post(clean))
        .route("/sessions/:session_id/operations", post(http_apply_operation))
        .route("/sessions/:session_id/reset", post(http_reset))
        .route("/sessions/:session_id/export", get(http_export))
        .route("/sessions/:session_id/summary", get(http_summary))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UploadQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let body = body.map_err(body_rejection)?;
    let response = upload_dataset(&state.api, q.filename.as_deref(), &body)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn clean(
    Query(q): Query<CleanQuery>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map_err(body_rejection)?;
    let options = CleanOptions {
        remove_duplicates: q.remove_duplicates,
        fill_missing: q.fill_missing,
        detect_outliers: q.detect_outliers,
    };
    let bytes = clean_once(q.filename.as_deref(), &body, options)
        .await
        .map_err(reject)?;
    Ok((StatusCode::OK, csv_headers(ONE_SHOT_FILENAME), bytes))
}

async fn http_apply_operation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    request: Result<Json<OperationRequest>, JsonRejection>,
) -> ApiResult<Json<OperationResult>> {
    let Json(request) = request.map_err(|rejection| {
        reject(ApiError::validation(format!(
            "Invalid operation: {}",
            rejection.body_text()
        )))
    })?;
    let result = apply_operation(&state.api, &SessionId(session_id), &request)
        .await
        .map_err(reject)?;
    Ok(Json(result))
}

async fn http_reset(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ResetResponse>> {
    let response = reset_dataset(&state.api, &SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_export(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = export_dataset(&state.api, &SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok((StatusCode::OK, csv_headers(EXPORT_FILENAME), bytes))
}

async fn http_summary(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SummaryResponse>> {
    let response = dataset_summary(&state.api, &SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

fn csv_headers(filename: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers
}

fn body_rejection(rejection: BytesRejection) -> (StatusCode, Json<ApiError>) {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return reject(ApiError::new(
            ErrorCode::PayloadTooLarge,
            "uploaded file exceeds the size limit",
        ));
    }
    reject(ApiError::validation(rejection.body_text()))
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    } else {
        warn!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
