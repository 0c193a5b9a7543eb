//! Core types for the reconnaissance engine.
//!
//! Domain model shared by the daemon, the repository layer, and the
//! CLI client: scan jobs, discovered subdomains, probe snapshots, and
//! the task records the dispatcher tracks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for jobs and tasks (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Enumerations ---

/// Scan job lifecycle status.
///
/// Transitions only pending -> running -> {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states stamp `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Liveness status of a discovered subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubdomainStatus {
    /// Enumerated but not yet probed.
    Found,
    Live,
    Dead,
}

impl SubdomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::Live => "live",
            Self::Dead => "dead",
        }
    }
}

/// Dispatcher-visible task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Progress,
    Retry,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Progress => "PROGRESS",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Typed unit of work; each kind routes to one named queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full four-stage pipeline for one job.
    FullScan,
    /// Subdomain enumeration stage only.
    Enumerate,
    /// HTTP probe stage only.
    ProbeHosts,
    /// Screenshot stage only.
    ScreenshotCapture,
    /// WAF fingerprint stage only.
    WafCheck,
    /// On-demand selective leak scan.
    LeakScan,
    /// Background housekeeping (old-job cleanup).
    Maintenance,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullScan => "full_scan",
            Self::Enumerate => "enumerate",
            Self::ProbeHosts => "probe_hosts",
            Self::ScreenshotCapture => "screenshot_capture",
            Self::WafCheck => "waf_check",
            Self::LeakScan => "leak_scan",
            Self::Maintenance => "maintenance",
        }
    }

    /// Named queue this task kind is routed to.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::FullScan => "recon_full",
            Self::Enumerate => "recon_enum",
            Self::ProbeHosts => "recon_check",
            Self::ScreenshotCapture => "recon_screenshot",
            Self::WafCheck => "waf_check",
            Self::LeakScan => "leak_check",
            Self::Maintenance => "maintenance",
        }
    }
}

/// Path-wordlist size selector for the leak scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Roughly a hundred paths.
    Tiny,
    /// Roughly a thousand paths.
    Full,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tiny" => Some(Self::Tiny),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Leak finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// --- Persisted entities ---

/// One reconnaissance run rooted at an apex domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: Id,
    /// Dispatcher task id; set once the initial task is enqueued.
    pub task_id: Option<String>,
    /// Lowercased apex domain, must contain a dot.
    pub domain: String,
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A discovered hostname within a job, optionally with its probe snapshot.
///
/// `(job_id, hostname)` is unique. Probe fields are populated once by the
/// probe stage and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subdomain {
    pub id: i64,
    pub job_id: Id,
    pub hostname: String,
    /// Which producer discovered this name (subfinder, amass, manual, ...).
    pub source: Option<String>,
    pub status: SubdomainStatus,
    pub is_live: bool,
    pub http_status: Option<i64>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content_length: Option<i64>,
    pub webserver: Option<String>,
    pub final_url: Option<String>,
    /// Free-form duration string as reported by the prober (e.g. "1.2s").
    pub response_time: Option<String>,
    pub cdn_name: Option<String>,
    pub content_type: Option<String>,
    /// Primary IP address.
    pub host_ip: Option<String>,
    pub chain_status_codes: Vec<i64>,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fingerprinted technology on a subdomain; unique per `(subdomain, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technology {
    pub id: i64,
    pub subdomain_id: i64,
    pub name: String,
}

/// Pointer to a screenshot file under the job directory.
///
/// The file on disk is the source of truth; this row only locates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub id: i64,
    pub job_id: Id,
    pub subdomain_id: Option<i64>,
    pub url: String,
    pub filename: String,
    /// Relative path under the jobs directory, stable for static serving.
    pub file_path: String,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// WAF fingerprint outcome for one probed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafDetection {
    pub id: i64,
    pub job_id: Id,
    pub url: String,
    pub has_waf: bool,
    pub waf_name: Option<String>,
    pub waf_manufacturer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Exposed-file finding from the path-brute tool. Never a 404.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakDetection {
    pub id: i64,
    pub job_id: Id,
    pub base_url: String,
    pub leaked_file_url: String,
    pub file_type: Option<String>,
    pub severity: Severity,
    pub file_size: Option<i64>,
    pub http_status: i64,
    pub created_at: DateTime<Utc>,
}

// --- Parser record shapes ---

/// One prober response, parsed from a line-delimited JSON record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub url: String,
    pub status_code: Option<u16>,
    pub is_live: bool,
    pub title: Option<String>,
    pub content_length: Option<i64>,
    pub webserver: Option<String>,
    pub final_url: Option<String>,
    pub response_time: Option<String>,
    pub cdn_name: Option<String>,
    pub content_type: Option<String>,
    pub host: Option<String>,
    pub chain_status_codes: Vec<u16>,
    pub ipv4_addresses: Vec<String>,
    pub ipv6_addresses: Vec<String>,
    pub technologies: Vec<String>,
}

impl ProbeRecord {
    /// Hostname part of the probed URL (scheme and path stripped).
    pub fn hostname(&self) -> &str {
        let rest = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"))
            .unwrap_or(&self.url);
        rest.split('/').next().unwrap_or(rest)
    }
}

/// One WAF fingerprinter result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafRecord {
    pub url: String,
    pub has_waf: bool,
    pub waf_name: Option<String>,
    pub waf_manufacturer: Option<String>,
}

/// One leak finding before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakRecord {
    /// scheme://host of the leaked file URL.
    pub base_url: String,
    pub leaked_file_url: String,
    pub file_type: Option<String>,
    pub severity: Severity,
    pub file_size: Option<i64>,
    pub http_status: u16,
}

/// One captured screenshot before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    /// Best-effort URL decoded from the capture tool's filename encoding.
    pub url: String,
    pub filename: String,
    /// Relative path under the jobs directory.
    pub file_path: String,
    pub file_size: Option<i64>,
}
