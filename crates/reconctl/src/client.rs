//! HTTP client for the recond daemon API.

use recon_core::types::ScanMode;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: recond\n  → or set RECOND_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unauthorized: check RECOND_TOKEN env var or --token flag")]
    Unauthorized,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::Http {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

// --- API payloads ---

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    domain: &'a str,
}

#[derive(Debug, Serialize)]
struct BulkScanRequest<'a> {
    domains: &'a [String],
}

#[derive(Debug, Serialize)]
struct SelectiveScanRequest<'a> {
    urls: &'a [String],
    mode: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AddSubdomainRequest {
    pub subdomain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ScanCreated {
    pub job_id: String,
    pub domain: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkScanResult {
    pub total_submitted: usize,
    pub jobs: Vec<ScanCreated>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanListItem {
    pub job_id: String,
    pub domain: String,
    pub status: String,
    pub created_at: String,
    pub subdomains_count: i64,
    pub screenshots_count: i64,
}

#[derive(Debug, Deserialize)]
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

#[derive(Debug, Deserialize)]
pub struct ScreenshotInfo {
    pub id: i64,
    pub url: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WafDetectionInfo {
    pub id: i64,
    pub url: String,
    pub has_waf: bool,
    pub waf_name: Option<String>,
    pub waf_manufacturer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeakDetectionInfo {
    pub id: i64,
    pub base_url: String,
    pub leaked_file_url: String,
    pub file_type: Option<String>,
    pub severity: String,
    pub file_size: Option<i64>,
    pub http_status: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScanResult {
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
pub struct LeakScanStarted {
    pub task_id: String,
    pub job_id: String,
    pub urls_to_scan: usize,
    pub mode: String,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AddedSubdomain {
    pub id: i64,
    pub subdomain: String,
    pub status: String,
    pub is_live: bool,
    pub http_status: Option<i64>,
    pub discovered_by: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

/// HTTP client for recond.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Decode a response, turning API error bodies into ClientError.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::InvalidResponse(e.to_string()));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }

        let message = response
            .json::<ApiError>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| status.to_string());
        Err(ClientError::Http {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn check_health(&self) -> Result<bool> {
        let response = self.request(reqwest::Method::GET, "/health").send().await?;
        Ok(response.status().is_success())
    }

    pub async fn create_scan(&self, domain: &str) -> Result<ScanCreated> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/scans")
            .json(&ScanRequest { domain })
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn create_bulk_scans(&self, domains: &[String]) -> Result<BulkScanResult> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/scans/bulk")
            .json(&BulkScanRequest { domains })
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn list_scans(&self, limit: i64, offset: i64) -> Result<Vec<ScanListItem>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/scans?limit={limit}&offset={offset}"),
            )
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn get_scan(&self, job_id: &str) -> Result<ScanResult> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v1/scans/{job_id}"))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn get_progress(&self, job_id: &str) -> Result<serde_json::Value> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/scans/{job_id}/progress"),
            )
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn delete_scan(&self, job_id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/api/v1/scans/{job_id}"))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    pub async fn run_leak_scan(
        &self,
        job_id: &str,
        urls: &[String],
        mode: ScanMode,
    ) -> Result<LeakScanStarted> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/scans/{job_id}/leak-scan"),
            )
            .json(&SelectiveScanRequest {
                urls,
                mode: mode.as_str(),
            })
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn add_subdomain(
        &self,
        job_id: &str,
        request: &AddSubdomainRequest,
    ) -> Result<AddedSubdomain> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/scans/{job_id}/subdomains"),
            )
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }
}
