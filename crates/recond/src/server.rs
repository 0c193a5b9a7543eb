//! HTTP API facade for the recond daemon.
//!
//! Small translation layer over the repository and the dispatcher:
//! scan creation mints the job, enqueues the initial task, and records
//! the task id; the progress endpoint prefers dispatcher state and
//! falls back to the stored job status.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use recon_core::artifacts::JobDir;
use recon_core::config::Config;
use recon_core::types::{
    Id, ScanJob, ScanMode, ScanStatus, SubdomainStatus, TaskKind, TaskState,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::dispatcher::{Dispatcher, LeakScanPayload, ScanPayload};
use crate::leakscan;
use crate::storage::{Storage, StorageError};

/// Shared state for HTTP handlers.
pub struct AppState {
    pub storage: Arc<Storage>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    pub auth_token: Option<String>,
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/scans", post(create_scan).get(list_scans))
        .route("/api/v1/scans/bulk", post(create_bulk_scans))
        .route(
            "/api/v1/scans/{job_id}",
            get(get_scan).delete(delete_scan),
        )
        .route("/api/v1/scans/{job_id}/progress", get(get_scan_progress))
        .route("/api/v1/scans/{job_id}/leak-scan", post(run_leak_scan))
        .route("/api/v1/scans/{job_id}/subdomains", post(add_subdomain))
        .route("/health", get(health_check))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server bound to localhost.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Validate the bearer token if one is configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), HandlerError> {
    if let Some(expected) = &state.auth_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

        match provided {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid auth token",
            )),
            None => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "missing auth token",
            )),
        }
    } else {
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn storage_error(e: StorageError) -> HandlerError {
    match e {
        StorageError::JobNotFound(id) => {
            error_response(StatusCode::NOT_FOUND, format!("scan job not found: {id}"))
        }
        StorageError::SubdomainExists(name) => error_response(
            StatusCode::CONFLICT,
            format!("subdomain already exists: {name}"),
        ),
        other => {
            error!("storage error: {other}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Lowercased, validated apex domain, or None when malformed.
fn normalize_domain(raw: &str) -> Option<String> {
    let domain = raw.trim().to_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(domain)
}

// --- Request/Response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub domain: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub job_id: String,
    pub domain: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkScanRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkScanResponse {
    pub total_submitted: usize,
    pub jobs: Vec<ScanResponse>,
    pub message: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListScansQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanListItem {
    pub job_id: String,
    pub domain: String,
    pub status: String,
    pub created_at: String,
    pub subdomains_count: i64,
    pub screenshots_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubdomainInfo {
    pub id: i64,
    pub subdomain: String,
    pub status: String,
    pub is_live: bool,
    pub http_status: Option<i64>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub response_time: Option<String>,
    pub discovered_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScreenshotInfo {
    pub id: i64,
    pub url: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WafDetectionInfo {
    pub id: i64,
    pub url: String,
    pub has_waf: bool,
    pub waf_name: Option<String>,
    pub waf_manufacturer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeakDetectionInfo {
    pub id: i64,
    pub base_url: String,
    pub leaked_file_url: String,
    pub file_type: Option<String>,
    pub severity: String,
    pub file_size: Option<i64>,
    pub http_status: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResultResponse {
    pub job_id: String,
    pub domain: String,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub subdomains: Vec<SubdomainInfo>,
    pub screenshots: Vec<ScreenshotInfo>,
    pub waf_detections: Vec<WafDetectionInfo>,
    pub leak_detections: Vec<LeakDetectionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SelectiveScanRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_scan_mode")]
    pub mode: String,
}

fn default_scan_mode() -> String {
    "tiny".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectiveScanResponse {
    pub task_id: String,
    pub job_id: String,
    pub urls_to_scan: usize,
    pub mode: String,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AddSubdomainRequest {
    pub subdomain: String,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub http_status: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddSubdomainResponse {
    pub id: i64,
    pub subdomain: String,
    pub status: String,
    pub is_live: bool,
    pub http_status: Option<i64>,
    pub discovered_by: String,
    pub message: String,
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Mint a job, dispatch the full scan, record the task id.
async fn submit_scan(state: &AppState, domain: String) -> Result<ScanResponse, HandlerError> {
    let job_id = Id::new();
    let now = Utc::now();
    let job = ScanJob {
        job_id: job_id.clone(),
        task_id: None,
        domain: domain.clone(),
        status: ScanStatus::Pending,
        error_message: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    state.storage.insert_job(&job).await.map_err(storage_error)?;

    let task = state
        .dispatcher
        .enqueue(
            TaskKind::FullScan,
            &ScanPayload {
                job_id: job_id.clone(),
                domain: domain.clone(),
            },
        )
        .await
        .map_err(|e| {
            error!("failed to dispatch scan task: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to dispatch scan")
        })?;
    state
        .storage
        .update_job_task_id(&job_id, task.id.as_ref())
        .await
        .map_err(storage_error)?;

    info!(job_id = %job_id, domain = %domain, task_id = %task.id, "scan job created");
    Ok(ScanResponse {
        job_id: job_id.to_string(),
        domain,
        status: "pending".to_string(),
        message: format!("Scan job created successfully. Task ID: {}", task.id),
    })
}

/// POST /api/v1/scans
async fn create_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let Some(domain) = normalize_domain(&req.domain) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid domain format",
        ));
    };

    let response = submit_scan(&state, domain).await?;
    Ok(Json(response))
}

/// POST /api/v1/scans/bulk — malformed domains are skipped, never
/// short-circuit the batch.
async fn create_bulk_scans(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BulkScanRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let mut jobs = Vec::new();
    for raw in &req.domains {
        let Some(domain) = normalize_domain(raw) else {
            warn!(domain = %raw, "skipping invalid domain in bulk submit");
            continue;
        };
        jobs.push(submit_scan(&state, domain).await?);
    }

    let message = format!("Successfully submitted {} scan jobs.", jobs.len());
    Ok(Json(BulkScanResponse {
        total_submitted: jobs.len(),
        jobs,
        message,
    }))
}

/// GET /api/v1/scans
async fn list_scans(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListScansQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);
    let jobs = state
        .storage
        .list_jobs(limit, offset)
        .await
        .map_err(storage_error)?;

    let mut items = Vec::with_capacity(jobs.len());
    for job in jobs {
        let subdomains_count = state
            .storage
            .count_subdomains(&job.job_id)
            .await
            .map_err(storage_error)?;
        let screenshots_count = state
            .storage
            .count_screenshots(&job.job_id)
            .await
            .map_err(storage_error)?;
        items.push(ScanListItem {
            job_id: job.job_id.to_string(),
            domain: job.domain,
            status: job.status.as_str().to_string(),
            created_at: job.created_at.to_rfc3339(),
            subdomains_count,
            screenshots_count,
        });
    }

    Ok(Json(items))
}

/// GET /api/v1/scans/{job_id}
async fn get_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(job_id);
    let job = state.storage.get_job(&job_id).await.map_err(storage_error)?;

    let subdomains = state
        .storage
        .list_subdomains(&job_id)
        .await
        .map_err(storage_error)?;
    let screenshots = state
        .storage
        .list_screenshots(&job_id)
        .await
        .map_err(storage_error)?;
    let waf_detections = state
        .storage
        .list_waf_detections(&job_id)
        .await
        .map_err(storage_error)?;
    let leak_detections = state
        .storage
        .list_leak_detections(&job_id)
        .await
        .map_err(storage_error)?;

    Ok(Json(ScanResultResponse {
        job_id: job.job_id.to_string(),
        domain: job.domain,
        status: job.status.as_str().to_string(),
        created_at: job.created_at.to_rfc3339(),
        completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        error_message: job.error_message,
        subdomains: subdomains
            .into_iter()
            .map(|s| SubdomainInfo {
                id: s.id,
                subdomain: s.hostname,
                status: s.status.as_str().to_string(),
                is_live: s.is_live,
                http_status: s.http_status,
                url: s.url,
                title: s.title,
                response_time: s.response_time,
                discovered_by: s.source,
            })
            .collect(),
        screenshots: screenshots
            .into_iter()
            .map(|s| ScreenshotInfo {
                id: s.id,
                url: s.url,
                filename: s.filename,
                file_path: s.file_path,
                file_size: s.file_size,
            })
            .collect(),
        waf_detections: waf_detections
            .into_iter()
            .map(|w| WafDetectionInfo {
                id: w.id,
                url: w.url,
                has_waf: w.has_waf,
                waf_name: w.waf_name,
                waf_manufacturer: w.waf_manufacturer,
            })
            .collect(),
        leak_detections: leak_detections
            .into_iter()
            .map(|l| LeakDetectionInfo {
                id: l.id,
                base_url: l.base_url,
                leaked_file_url: l.leaked_file_url,
                file_type: l.file_type,
                severity: l.severity.as_str().to_string(),
                file_size: l.file_size,
                http_status: l.http_status,
            })
            .collect(),
    }))
}

/// GET /api/v1/scans/{job_id}/progress — dispatcher state first, DB
/// status as the fallback when no task id is recorded.
async fn get_scan_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(job_id);
    let job = state.storage.get_job(&job_id).await.map_err(storage_error)?;

    if let Some(task_id) = &job.task_id {
        if let Ok(task) = state.dispatcher.get_task(task_id).await {
            let progress: Option<serde_json::Value> = task
                .progress_json
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok());
            let result: Option<serde_json::Value> = task
                .result_json
                .as_deref()
                .and_then(|r| serde_json::from_str(r).ok());

            let body = match task.state {
                TaskState::Pending => serde_json::json!({
                    "job_id": job_id,
                    "status": "pending",
                    "message": "Task is waiting to be executed",
                    "db_status": job.status.as_str(),
                }),
                TaskState::Started | TaskState::Progress => serde_json::json!({
                    "job_id": job_id,
                    "status": "running",
                    "progress": progress,
                    "db_status": job.status.as_str(),
                }),
                TaskState::Retry => serde_json::json!({
                    "job_id": job_id,
                    "status": "retrying",
                    "message": "Task is being retried",
                    "progress": progress,
                    "db_status": job.status.as_str(),
                }),
                TaskState::Success => serde_json::json!({
                    "job_id": job_id,
                    "status": "completed",
                    "result": result,
                    "db_status": job.status.as_str(),
                }),
                TaskState::Failure => serde_json::json!({
                    "job_id": job_id,
                    "status": "failed",
                    "error": task.error,
                    "db_status": job.status.as_str(),
                }),
            };
            return Ok(Json(body));
        }
    }

    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "status": job.status.as_str(),
        "db_status": job.status.as_str(),
        "created_at": job.created_at.to_rfc3339(),
        "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
        "error_message": job.error_message,
    })))
}

/// DELETE /api/v1/scans/{job_id} — revoke the task, then cascade.
async fn delete_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(job_id);
    let job = state.storage.get_job(&job_id).await.map_err(storage_error)?;

    if let Some(task_id) = &job.task_id {
        if let Err(e) = state.dispatcher.revoke(task_id).await {
            warn!(job_id = %job_id, error = %e, "failed to revoke task");
        }
    }

    let dirs = JobDir::new(&state.config.jobs_dir, &job_id);
    if dirs.exists() {
        if let Err(e) = std::fs::remove_dir_all(dirs.root()) {
            warn!(job_id = %job_id, error = %e, "failed to remove job directory");
        }
    }

    state.storage.delete_job(&job_id).await.map_err(storage_error)?;

    info!(job_id = %job_id, "scan job deleted");
    Ok(Json(serde_json::json!({
        "message": format!("Scan job {job_id} deleted successfully")
    })))
}

/// POST /api/v1/scans/{job_id}/leak-scan
async fn run_leak_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(req): Json<SelectiveScanRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let Some(mode) = ScanMode::parse(&req.mode) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Must be 'tiny' or 'full'",
        ));
    };

    let job_id = Id::from_string(job_id);
    let job = state.storage.get_job(&job_id).await.map_err(storage_error)?;

    if job.status != ScanStatus::Completed {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "Scan job must be completed. Current status: {}",
                job.status.as_str()
            ),
        ));
    }

    let dirs = JobDir::new(&state.config.jobs_dir, &job_id);
    let live_file = dirs.live_file();
    if !live_file.is_file() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "No live hosts found for this job. Run a full scan first.",
        ));
    }

    let valid = leakscan::read_live_urls(&live_file).map_err(|e| {
        error!(job_id = %job_id, error = %e, "failed to read live hosts");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;
    let urls_to_scan = leakscan::filter_requested_urls(&req.urls, &valid);

    if urls_to_scan.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "None of the provided URLs are valid live hosts from this job",
        ));
    }

    let count = urls_to_scan.len();
    let task = state
        .dispatcher
        .enqueue(
            TaskKind::LeakScan,
            &LeakScanPayload {
                job_id: job_id.clone(),
                urls: urls_to_scan,
                mode,
            },
        )
        .await
        .map_err(|e| {
            error!("failed to dispatch leak scan: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to dispatch leak scan",
            )
        })?;
    state
        .storage
        .update_job_task_id(&job_id, task.id.as_ref())
        .await
        .map_err(storage_error)?;

    Ok(Json(SelectiveScanResponse {
        task_id: task.id.to_string(),
        job_id: job_id.to_string(),
        urls_to_scan: count,
        mode: mode.as_str().to_string(),
        message: format!(
            "Leak scan started on {count} URLs in '{}' mode. Use task_id to check progress.",
            mode.as_str()
        ),
        status: "started".to_string(),
    }))
}

/// POST /api/v1/scans/{job_id}/subdomains — manual addition.
async fn add_subdomain(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(req): Json<AddSubdomainRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    check_auth(&state, &headers)?;

    let job_id = Id::from_string(job_id);
    let job = state.storage.get_job(&job_id).await.map_err(storage_error)?;

    // Accept either a bare hostname or a URL; keep the host only.
    let trimmed = req.subdomain.trim().to_lowercase();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(&trimmed);
    let hostname = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    if hostname.is_empty() || !hostname.contains('.') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid subdomain format. Must be a valid domain name",
        ));
    }
    if !hostname.ends_with(&job.domain) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Subdomain must belong to the scan's domain ({})", job.domain),
        ));
    }

    let subdomain = state
        .storage
        .insert_subdomain(&job_id, &hostname, "manual")
        .await
        .map_err(storage_error)?;

    let status = match req.is_live {
        Some(true) => SubdomainStatus::Live,
        Some(false) => SubdomainStatus::Dead,
        None => SubdomainStatus::Found,
    };
    if req.is_live.is_some() || req.http_status.is_some() {
        state
            .storage
            .update_subdomain_liveness(
                subdomain.id,
                status,
                req.is_live.unwrap_or(false),
                req.http_status,
            )
            .await
            .map_err(storage_error)?;
    }

    Ok(Json(AddSubdomainResponse {
        id: subdomain.id,
        subdomain: hostname.clone(),
        status: status.as_str().to_string(),
        is_live: req.is_live.unwrap_or(false),
        http_status: req.http_status,
        discovered_by: "manual".to_string(),
        message: format!("Subdomain '{hostname}' added successfully"),
    }))
}
