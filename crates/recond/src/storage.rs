//! SQLite repository for the recond daemon.
//!
//! Thin synchronous boundary around the relational store: scan jobs,
//! discovered subdomains with their probe snapshots, screenshots, WAF
//! and leak detections, and the dispatcher's task table. Writes are
//! batched per stage; cascade deletes run in one transaction.

use chrono::{DateTime, Utc};
use recon_core::types::{
    Id, LeakDetection, LeakRecord, ProbeRecord, ScanJob, ScanStatus, Screenshot, ScreenshotRecord,
    Severity, Subdomain, SubdomainStatus, TaskKind, TaskState, Technology, WafDetection, WafRecord,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

use crate::dispatcher::Task;

/// Explicit column list for subdomain queries. Explicit columns keep
/// row mapping correct regardless of column order after ALTER TABLE.
const SUBDOMAIN_COLUMNS: &str = "id, job_id, hostname, source, status, is_live, http_status, \
    url, title, content_length, webserver, final_url, response_time, cdn_name, content_type, \
    host_ip, chain_status_codes, ipv4_addresses, ipv6_addresses, created_at";

const TASK_COLUMNS: &str = "id, kind, queue, priority, state, payload_json, progress_json, \
    result_json, error, attempt, max_retries, available_at, started_at, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("scan job not found: {0}")]
    JobNotFound(String),
    #[error("subdomain not found: {0}")]
    SubdomainNotFound(String),
    #[error("subdomain already exists: {0}")]
    SubdomainExists(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("invalid status transition: {0} -> {1}")]
    InvalidTransition(String, String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage backend for the daemon.
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    /// Open (or create) the database at the given path.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        // Enable WAL mode
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema, statement by statement.
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    match sqlx::query(trimmed).execute(&self.pool).await {
                        Ok(_) => {}
                        Err(e) => {
                            let msg = e.to_string();
                            // Idempotent re-runs hit these; anything else is real.
                            if !msg.contains("duplicate column") && !msg.contains("already exists")
                            {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Scan job operations ---

    /// Insert a new scan job.
    pub async fn insert_job(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (job_id, task_id, domain, status, error_message,
                                   created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(job.job_id.as_ref())
        .bind(&job.task_id)
        .bind(&job.domain)
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .bind(job.completed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a scan job by id.
    pub async fn get_job(&self, job_id: &Id) -> Result<ScanJob> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM scan_jobs WHERE job_id = ?1")
            .bind(job_id.as_ref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))?;

        Ok(row.into_job())
    }

    /// List jobs, newest first, with offset/limit pagination.
    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<ScanJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM scan_jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_job()).collect())
    }

    /// Jobs currently marked running, for startup recovery.
    pub async fn list_running_jobs(&self) -> Result<Vec<ScanJob>> {
        let rows =
            sqlx::query_as::<_, JobRow>("SELECT * FROM scan_jobs WHERE status = 'running'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.into_job()).collect())
    }

    /// Atomically transition a job's status, stamping `completed_at`
    /// when the new status is terminal.
    ///
    /// Legal transitions: pending -> running -> {completed, failed};
    /// re-asserting the current status is a no-op (a retried task marks
    /// the job running again on each attempt).
    pub async fn update_job_status(
        &self,
        job_id: &Id,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let job = self.get_job(job_id).await?;

        let legal = job.status == status
            || matches!(
                (job.status, status),
                (ScanStatus::Pending, ScanStatus::Running)
                    | (ScanStatus::Running, ScanStatus::Completed)
                    | (ScanStatus::Running, ScanStatus::Failed)
                    | (ScanStatus::Pending, ScanStatus::Failed)
            );
        if !legal {
            return Err(StorageError::InvalidTransition(
                job.status.as_str().to_string(),
                status.as_str().to_string(),
            ));
        }

        let now = Utc::now().timestamp_millis();
        let completed_at = if status.is_terminal() { Some(now) } else { None };

        let result = sqlx::query(
            "UPDATE scan_jobs SET status = ?1, error_message = COALESCE(?2, error_message), \
             completed_at = ?3, updated_at = ?4 WHERE job_id = ?5",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(completed_at)
        .bind(now)
        .bind(job_id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Record the dispatcher task id for progress tracking.
    pub async fn update_job_task_id(&self, job_id: &Id, task_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result =
            sqlx::query("UPDATE scan_jobs SET task_id = ?1, updated_at = ?2 WHERE job_id = ?3")
                .bind(task_id)
                .bind(now)
                .bind(job_id.as_ref())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Delete a job and everything it owns, in one transaction.
    pub async fn delete_job(&self, job_id: &Id) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM technologies WHERE subdomain_id IN \
             (SELECT id FROM subdomains WHERE job_id = ?1)",
        )
        .bind(job_id.as_ref())
        .execute(&mut *tx)
        .await?;

        for table in [
            "screenshots",
            "waf_detections",
            "leak_detections",
            "subdomains",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE job_id = ?1"))
                .bind(job_id.as_ref())
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM scan_jobs WHERE job_id = ?1")
            .bind(job_id.as_ref())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Jobs older than the cutoff, for maintenance cleanup.
    pub async fn list_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<ScanJob>> {
        let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM scan_jobs WHERE created_at < ?1")
            .bind(cutoff.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_job()).collect())
    }

    // --- Subdomain operations ---

    /// Bulk-insert discovered hostnames; duplicates of `(job, hostname)`
    /// are ignored so re-running enumeration is idempotent.
    pub async fn bulk_insert_subdomains(
        &self,
        job_id: &Id,
        hostnames: &[String],
        source: &str,
    ) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let mut inserted = 0;

        let mut tx = self.pool.begin().await?;
        for hostname in hostnames {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO subdomains (job_id, hostname, source, status, created_at) \
                 VALUES (?1, ?2, ?3, 'found', ?4)",
            )
            .bind(job_id.as_ref())
            .bind(hostname)
            .bind(source)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    /// Insert a single subdomain; duplicate `(job, hostname)` is a conflict.
    pub async fn insert_subdomain(
        &self,
        job_id: &Id,
        hostname: &str,
        source: &str,
    ) -> Result<Subdomain> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subdomains (job_id, hostname, source, status, created_at) \
             VALUES (?1, ?2, ?3, 'found', ?4)",
        )
        .bind(job_id.as_ref())
        .bind(hostname)
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SubdomainExists(hostname.to_string()));
        }

        self.get_subdomain_by_hostname(job_id, hostname)
            .await?
            .ok_or_else(|| StorageError::SubdomainNotFound(hostname.to_string()))
    }

    /// All subdomains for a job, in insertion order.
    pub async fn list_subdomains(&self, job_id: &Id) -> Result<Vec<Subdomain>> {
        let query = format!("SELECT {SUBDOMAIN_COLUMNS} FROM subdomains WHERE job_id = ?1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, SubdomainRow>(&query)
            .bind(job_id.as_ref())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_subdomain()).collect())
    }

    pub async fn get_subdomain_by_hostname(
        &self,
        job_id: &Id,
        hostname: &str,
    ) -> Result<Option<Subdomain>> {
        let query =
            format!("SELECT {SUBDOMAIN_COLUMNS} FROM subdomains WHERE job_id = ?1 AND hostname = ?2");
        let row = sqlx::query_as::<_, SubdomainRow>(&query)
            .bind(job_id.as_ref())
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_subdomain()))
    }

    pub async fn count_subdomains(&self, job_id: &Id) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subdomains WHERE job_id = ?1")
            .bind(job_id.as_ref())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Write one probe snapshot onto its subdomain row.
    ///
    /// Returns the subdomain id when a row matched the record's hostname.
    pub async fn apply_probe_record(
        &self,
        job_id: &Id,
        record: &ProbeRecord,
    ) -> Result<Option<i64>> {
        let status = if record.is_live {
            SubdomainStatus::Live
        } else {
            SubdomainStatus::Dead
        };

        let chain = serde_json::to_string(&record.chain_status_codes)?;
        let ipv4 = serde_json::to_string(&record.ipv4_addresses)?;
        let ipv6 = serde_json::to_string(&record.ipv6_addresses)?;

        sqlx::query(
            "UPDATE subdomains SET status = ?1, is_live = ?2, http_status = ?3, url = ?4, \
             title = ?5, content_length = ?6, webserver = ?7, final_url = ?8, \
             response_time = ?9, cdn_name = ?10, content_type = ?11, host_ip = ?12, \
             chain_status_codes = ?13, ipv4_addresses = ?14, ipv6_addresses = ?15 \
             WHERE job_id = ?16 AND hostname = ?17",
        )
        .bind(status.as_str())
        .bind(record.is_live)
        .bind(record.status_code.map(i64::from))
        .bind(&record.url)
        .bind(&record.title)
        .bind(record.content_length)
        .bind(&record.webserver)
        .bind(&record.final_url)
        .bind(&record.response_time)
        .bind(&record.cdn_name)
        .bind(&record.content_type)
        .bind(&record.host)
        .bind(chain)
        .bind(ipv4)
        .bind(ipv6)
        .bind(job_id.as_ref())
        .bind(record.hostname())
        .execute(&self.pool)
        .await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM subdomains WHERE job_id = ?1 AND hostname = ?2")
                .bind(job_id.as_ref())
                .bind(record.hostname())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    /// Hostnames the prober returned nothing for are assumed dead.
    pub async fn mark_unprobed_dead(&self, job_id: &Id) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subdomains SET status = 'dead' WHERE job_id = ?1 AND status = 'found'",
        )
        .bind(job_id.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Set liveness fields on a manually added subdomain.
    pub async fn update_subdomain_liveness(
        &self,
        subdomain_id: i64,
        status: SubdomainStatus,
        is_live: bool,
        http_status: Option<i64>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE subdomains SET status = ?1, is_live = ?2, http_status = ?3 WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(is_live)
        .bind(http_status)
        .bind(subdomain_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SubdomainNotFound(subdomain_id.to_string()));
        }
        Ok(())
    }

    // --- Technology operations ---

    /// Bulk-insert fingerprinted technologies; `(subdomain, name)`
    /// duplicates are ignored.
    pub async fn bulk_insert_technologies(
        &self,
        subdomain_id: i64,
        names: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for name in names {
            sqlx::query(
                "INSERT OR IGNORE INTO technologies (subdomain_id, name) VALUES (?1, ?2)",
            )
            .bind(subdomain_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_technologies(&self, subdomain_id: i64) -> Result<Vec<Technology>> {
        let rows = sqlx::query_as::<_, TechnologyRow>(
            "SELECT id, subdomain_id, name FROM technologies WHERE subdomain_id = ?1 ORDER BY name",
        )
        .bind(subdomain_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Technology {
                id: r.id,
                subdomain_id: r.subdomain_id,
                name: r.name,
            })
            .collect())
    }

    // --- Screenshot operations ---

    pub async fn insert_screenshot(
        &self,
        job_id: &Id,
        record: &ScreenshotRecord,
        subdomain_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO screenshots (job_id, subdomain_id, url, filename, file_path, \
             file_size, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(job_id.as_ref())
        .bind(subdomain_id)
        .bind(&record.url)
        .bind(&record.filename)
        .bind(&record.file_path)
        .bind(record.file_size)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_screenshots(&self, job_id: &Id) -> Result<Vec<Screenshot>> {
        let rows = sqlx::query_as::<_, ScreenshotRow>(
            "SELECT * FROM screenshots WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_screenshot()).collect())
    }

    pub async fn count_screenshots(&self, job_id: &Id) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM screenshots WHERE job_id = ?1")
            .bind(job_id.as_ref())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // --- WAF detection operations ---

    pub async fn bulk_insert_waf_detections(
        &self,
        job_id: &Id,
        records: &[WafRecord],
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO waf_detections (job_id, url, has_waf, waf_name, waf_manufacturer, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(job_id.as_ref())
            .bind(&record.url)
            .bind(record.has_waf)
            .bind(&record.waf_name)
            .bind(&record.waf_manufacturer)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_waf_detections(&self, job_id: &Id) -> Result<Vec<WafDetection>> {
        let rows = sqlx::query_as::<_, WafRow>(
            "SELECT * FROM waf_detections WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_detection()).collect())
    }

    // --- Leak detection operations ---

    /// Bulk-insert leak findings. A 404 can never be persisted as a
    /// leak, whatever the parser let through.
    pub async fn bulk_insert_leak_detections(
        &self,
        job_id: &Id,
        records: &[LeakRecord],
    ) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let mut inserted = 0;

        let mut tx = self.pool.begin().await?;
        for record in records {
            if record.http_status == 404 {
                continue;
            }
            sqlx::query(
                "INSERT INTO leak_detections (job_id, base_url, leaked_file_url, file_type, \
                 severity, file_size, http_status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(job_id.as_ref())
            .bind(&record.base_url)
            .bind(&record.leaked_file_url)
            .bind(&record.file_type)
            .bind(record.severity.as_str())
            .bind(record.file_size)
            .bind(i64::from(record.http_status))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }
        tx.commit().await?;

        Ok(inserted)
    }

    pub async fn list_leak_detections(&self, job_id: &Id) -> Result<Vec<LeakDetection>> {
        let rows = sqlx::query_as::<_, LeakRow>(
            "SELECT * FROM leak_detections WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_detection()).collect())
    }

    // --- Task operations (dispatcher persistence) ---

    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, kind, queue, priority, state, payload_json, progress_json,
                               result_json, error, attempt, max_retries, available_at,
                               started_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(task.id.as_ref())
        .bind(task.kind.as_str())
        .bind(task.kind.queue())
        .bind(i64::from(task.priority))
        .bind(task.state.as_str())
        .bind(&task.payload_json)
        .bind(&task.progress_json)
        .bind(&task.result_json)
        .bind(&task.error)
        .bind(i64::from(task.attempt))
        .bind(i64::from(task.max_retries))
        .bind(task.available_at.timestamp_millis())
        .bind(task.started_at.map(|t| t.timestamp_millis()))
        .bind(task.created_at.timestamp_millis())
        .bind(task.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::TaskNotFound(task_id.to_string()))?;
        Ok(row.into_task())
    }

    /// Next claimable task: pending or scheduled-for-retry, whose
    /// backoff countdown has elapsed; highest priority first, then
    /// oldest. The dispatcher serializes calls, so select-then-update
    /// is race-free.
    pub async fn claim_due_task(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE state IN ('PENDING', 'RETRY') AND available_at <= ?1 \
             ORDER BY priority DESC, created_at ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(now.timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = row.into_task();

        let now_ms = now.timestamp_millis();
        sqlx::query(
            "UPDATE tasks SET state = 'STARTED', attempt = attempt + 1, started_at = ?1, \
             updated_at = ?1 WHERE id = ?2",
        )
        .bind(now_ms)
        .bind(task.id.as_ref())
        .execute(&self.pool)
        .await?;

        task.state = TaskState::Started;
        task.attempt += 1;
        task.started_at = Some(now);
        Ok(Some(task))
    }

    /// Publish a progress heartbeat. Ignored once the task is terminal.
    pub async fn set_task_progress(&self, task_id: &str, progress_json: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET state = 'PROGRESS', progress_json = ?1, updated_at = ?2 \
             WHERE id = ?3 AND state NOT IN ('SUCCESS', 'FAILURE')",
        )
        .bind(progress_json)
        .bind(Utc::now().timestamp_millis())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_task_success(&self, task_id: &str, result_json: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'SUCCESS', result_json = ?1, error = NULL, \
             updated_at = ?2 WHERE id = ?3",
        )
        .bind(result_json)
        .bind(Utc::now().timestamp_millis())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_task_failure(&self, task_id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'FAILURE', error = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    /// Schedule a retry: RETRY state plus a backoff deadline.
    pub async fn schedule_task_retry(
        &self,
        task_id: &str,
        available_at: DateTime<Utc>,
        error: &str,
        progress_json: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'RETRY', available_at = ?1, error = ?2, \
             progress_json = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(available_at.timestamp_millis())
        .bind(error)
        .bind(progress_json)
        .bind(Utc::now().timestamp_millis())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    /// Late-ack recovery: tasks a dead worker left in flight go back to
    /// the queue. Returns the affected task ids.
    pub async fn requeue_in_flight_tasks(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM tasks WHERE state IN ('STARTED', 'PROGRESS')")
                .fetch_all(&self.pool)
                .await?;

        let now = Utc::now().timestamp_millis();
        for (id,) in &rows {
            sqlx::query(
                "UPDATE tasks SET state = 'PENDING', available_at = ?1, updated_at = ?1 \
                 WHERE id = ?2",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    task_id: Option<String>,
    domain: String,
    status: String,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> ScanJob {
        let status = parse_scan_status(&self.status);
        ScanJob {
            job_id: Id::from_string(self.job_id),
            task_id: self.task_id,
            domain: self.domain,
            status,
            error_message: self.error_message,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
            completed_at: self.completed_at.and_then(DateTime::from_timestamp_millis),
        }
    }
}

fn parse_scan_status(s: &str) -> ScanStatus {
    match s {
        "pending" => ScanStatus::Pending,
        "running" => ScanStatus::Running,
        "completed" => ScanStatus::Completed,
        _ => ScanStatus::Failed,
    }
}

fn parse_json_array<T: serde::de::DeserializeOwned>(value: Option<String>) -> Vec<T> {
    value
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or_default()
}

#[derive(sqlx::FromRow)]
struct SubdomainRow {
    id: i64,
    job_id: String,
    hostname: String,
    source: Option<String>,
    status: String,
    is_live: bool,
    http_status: Option<i64>,
    url: Option<String>,
    title: Option<String>,
    content_length: Option<i64>,
    webserver: Option<String>,
    final_url: Option<String>,
    response_time: Option<String>,
    cdn_name: Option<String>,
    content_type: Option<String>,
    host_ip: Option<String>,
    chain_status_codes: Option<String>,
    ipv4_addresses: Option<String>,
    ipv6_addresses: Option<String>,
    created_at: i64,
}

impl SubdomainRow {
    fn into_subdomain(self) -> Subdomain {
        let status = match self.status.as_str() {
            "live" => SubdomainStatus::Live,
            "dead" => SubdomainStatus::Dead,
            _ => SubdomainStatus::Found,
        };
        Subdomain {
            id: self.id,
            job_id: Id::from_string(self.job_id),
            hostname: self.hostname,
            source: self.source,
            status,
            is_live: self.is_live,
            http_status: self.http_status,
            url: self.url,
            title: self.title,
            content_length: self.content_length,
            webserver: self.webserver,
            final_url: self.final_url,
            response_time: self.response_time,
            cdn_name: self.cdn_name,
            content_type: self.content_type,
            host_ip: self.host_ip,
            chain_status_codes: parse_json_array(self.chain_status_codes),
            ipv4_addresses: parse_json_array(self.ipv4_addresses),
            ipv6_addresses: parse_json_array(self.ipv6_addresses),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TechnologyRow {
    id: i64,
    subdomain_id: i64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct ScreenshotRow {
    id: i64,
    job_id: String,
    subdomain_id: Option<i64>,
    url: String,
    filename: String,
    file_path: String,
    file_size: Option<i64>,
    created_at: i64,
}

impl ScreenshotRow {
    fn into_screenshot(self) -> Screenshot {
        Screenshot {
            id: self.id,
            job_id: Id::from_string(self.job_id),
            subdomain_id: self.subdomain_id,
            url: self.url,
            filename: self.filename,
            file_path: self.file_path,
            file_size: self.file_size,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WafRow {
    id: i64,
    job_id: String,
    url: String,
    has_waf: bool,
    waf_name: Option<String>,
    waf_manufacturer: Option<String>,
    created_at: i64,
}

impl WafRow {
    fn into_detection(self) -> WafDetection {
        WafDetection {
            id: self.id,
            job_id: Id::from_string(self.job_id),
            url: self.url,
            has_waf: self.has_waf,
            waf_name: self.waf_name,
            waf_manufacturer: self.waf_manufacturer,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct LeakRow {
    id: i64,
    job_id: String,
    base_url: String,
    leaked_file_url: String,
    file_type: Option<String>,
    severity: String,
    file_size: Option<i64>,
    http_status: i64,
    created_at: i64,
}

impl LeakRow {
    fn into_detection(self) -> LeakDetection {
        let severity = match self.severity.as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        };
        LeakDetection {
            id: self.id,
            job_id: Id::from_string(self.job_id),
            base_url: self.base_url,
            leaked_file_url: self.leaked_file_url,
            file_type: self.file_type,
            severity,
            file_size: self.file_size,
            http_status: self.http_status,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    kind: String,
    #[allow(dead_code)]
    queue: String,
    priority: i64,
    state: String,
    payload_json: String,
    progress_json: Option<String>,
    result_json: Option<String>,
    error: Option<String>,
    attempt: i64,
    max_retries: i64,
    available_at: i64,
    started_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> Task {
        let kind = match self.kind.as_str() {
            "full_scan" => TaskKind::FullScan,
            "enumerate" => TaskKind::Enumerate,
            "probe_hosts" => TaskKind::ProbeHosts,
            "screenshot_capture" => TaskKind::ScreenshotCapture,
            "waf_check" => TaskKind::WafCheck,
            "leak_scan" => TaskKind::LeakScan,
            _ => TaskKind::Maintenance,
        };
        let state = match self.state.as_str() {
            "PENDING" => TaskState::Pending,
            "STARTED" => TaskState::Started,
            "PROGRESS" => TaskState::Progress,
            "RETRY" => TaskState::Retry,
            "SUCCESS" => TaskState::Success,
            _ => TaskState::Failure,
        };
        Task {
            id: Id::from_string(self.id),
            kind,
            priority: self.priority as u8,
            state,
            payload_json: self.payload_json,
            progress_json: self.progress_json,
            result_json: self.result_json,
            error: self.error,
            attempt: self.attempt as u32,
            max_retries: self.max_retries as u32,
            available_at: DateTime::from_timestamp_millis(self.available_at).unwrap_or_default(),
            started_at: self.started_at.and_then(DateTime::from_timestamp_millis),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(self.updated_at).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStorage {
        storage: Storage,
        _dir: TempDir, // Keep alive to prevent cleanup
    }

    async fn create_test_storage() -> TestStorage {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        TestStorage { storage, _dir: dir }
    }

    fn create_test_job(domain: &str) -> ScanJob {
        let now = Utc::now();
        ScanJob {
            job_id: Id::new(),
            task_id: None,
            domain: domain.to_string(),
            status: ScanStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_job() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");

        ts.storage.insert_job(&job).await.unwrap();
        let retrieved = ts.storage.get_job(&job.job_id).await.unwrap();

        assert_eq!(retrieved.job_id, job.job_id);
        assert_eq!(retrieved.domain, "example.com");
        assert_eq!(retrieved.status, ScanStatus::Pending);
        assert!(retrieved.completed_at.is_none());
    }

    #[tokio::test]
    async fn status_transition_stamps_completed_at() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        ts.storage
            .update_job_status(&job.job_id, ScanStatus::Running, None)
            .await
            .unwrap();
        let running = ts.storage.get_job(&job.job_id).await.unwrap();
        assert!(running.completed_at.is_none());

        ts.storage
            .update_job_status(&job.job_id, ScanStatus::Completed, None)
            .await
            .unwrap();
        let done = ts.storage.get_job(&job.job_id).await.unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        let completed_at = done.completed_at.expect("completed_at set");
        assert!(completed_at >= done.created_at);
    }

    #[tokio::test]
    async fn illegal_status_transition_is_rejected() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        // pending -> completed skips running
        let err = ts
            .storage
            .update_job_status(&job.job_id, ScanStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition(_, _)));

        // completed jobs cannot go back to running
        ts.storage
            .update_job_status(&job.job_id, ScanStatus::Running, None)
            .await
            .unwrap();
        ts.storage
            .update_job_status(&job.job_id, ScanStatus::Completed, None)
            .await
            .unwrap();
        let err = ts
            .storage
            .update_job_status(&job.job_id, ScanStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition(_, _)));
    }

    #[tokio::test]
    async fn list_jobs_paginates_newest_first() {
        let ts = create_test_storage().await;
        for i in 0..5 {
            let mut job = create_test_job(&format!("d{i}.com"));
            job.created_at = DateTime::from_timestamp_millis(1_700_000_000_000 + i * 1000)
                .unwrap()
                .with_timezone(&Utc);
            ts.storage.insert_job(&job).await.unwrap();
        }

        let page = ts.storage.list_jobs(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].domain, "d4.com");
        assert_eq!(page[1].domain, "d3.com");

        let next = ts.storage.list_jobs(2, 2).await.unwrap();
        assert_eq!(next[0].domain, "d2.com");
    }

    #[tokio::test]
    async fn bulk_insert_subdomains_is_idempotent() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        let names = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let first = ts
            .storage
            .bulk_insert_subdomains(&job.job_id, &names, "subfinder")
            .await
            .unwrap();
        assert_eq!(first, 2);

        // Same list again: nothing new.
        let second = ts
            .storage
            .bulk_insert_subdomains(&job.job_id, &names, "subfinder")
            .await
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(ts.storage.count_subdomains(&job.job_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn insert_subdomain_conflicts_on_duplicate() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        ts.storage
            .insert_subdomain(&job.job_id, "admin.example.com", "manual")
            .await
            .unwrap();
        let err = ts
            .storage
            .insert_subdomain(&job.job_id, "admin.example.com", "manual")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SubdomainExists(_)));
    }

    #[tokio::test]
    async fn probe_record_updates_subdomain_and_marks_rest_dead() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        let names = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        ts.storage
            .bulk_insert_subdomains(&job.job_id, &names, "subfinder")
            .await
            .unwrap();

        let record = ProbeRecord {
            url: "https://a.example.com".to_string(),
            status_code: Some(200),
            is_live: true,
            title: Some("Home".to_string()),
            webserver: Some("nginx".to_string()),
            chain_status_codes: vec![301, 200],
            ipv4_addresses: vec!["1.2.3.4".to_string()],
            technologies: vec!["Nginx".to_string()],
            ..ProbeRecord::default()
        };
        let sub_id = ts
            .storage
            .apply_probe_record(&job.job_id, &record)
            .await
            .unwrap()
            .expect("matched subdomain");
        ts.storage
            .bulk_insert_technologies(sub_id, &record.technologies)
            .await
            .unwrap();
        ts.storage.mark_unprobed_dead(&job.job_id).await.unwrap();

        let subs = ts.storage.list_subdomains(&job.job_id).await.unwrap();
        let a = subs.iter().find(|s| s.hostname == "a.example.com").unwrap();
        assert_eq!(a.status, SubdomainStatus::Live);
        assert!(a.is_live);
        assert_eq!(a.http_status, Some(200));
        assert_eq!(a.title.as_deref(), Some("Home"));
        assert_eq!(a.chain_status_codes, vec![301, 200]);
        assert_eq!(a.ipv4_addresses, vec!["1.2.3.4"]);

        let b = subs.iter().find(|s| s.hostname == "b.example.com").unwrap();
        assert_eq!(b.status, SubdomainStatus::Dead);
        assert!(!b.is_live);

        let techs = ts.storage.list_technologies(sub_id).await.unwrap();
        assert_eq!(techs.len(), 1);
        assert_eq!(techs[0].name, "Nginx");
    }

    #[tokio::test]
    async fn leak_insert_refuses_404_rows() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        let records = vec![
            LeakRecord {
                base_url: "https://a.example.com".to_string(),
                leaked_file_url: "https://a.example.com/.env".to_string(),
                file_type: Some("text/plain".to_string()),
                severity: Severity::High,
                file_size: Some(42),
                http_status: 200,
            },
            LeakRecord {
                base_url: "https://a.example.com".to_string(),
                leaked_file_url: "https://a.example.com/missing".to_string(),
                file_type: None,
                severity: Severity::Low,
                file_size: None,
                http_status: 404,
            },
        ];

        let inserted = ts
            .storage
            .bulk_insert_leak_detections(&job.job_id, &records)
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let leaks = ts.storage.list_leak_detections(&job.job_id).await.unwrap();
        assert_eq!(leaks.len(), 1);
        assert!(leaks.iter().all(|l| l.http_status != 404));
        assert_eq!(leaks[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn delete_job_cascades_and_leaves_no_orphans() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        let names = vec!["a.example.com".to_string()];
        ts.storage
            .bulk_insert_subdomains(&job.job_id, &names, "subfinder")
            .await
            .unwrap();
        let sub = ts
            .storage
            .get_subdomain_by_hostname(&job.job_id, "a.example.com")
            .await
            .unwrap()
            .unwrap();
        ts.storage
            .bulk_insert_technologies(sub.id, &["Nginx".to_string()])
            .await
            .unwrap();
        ts.storage
            .insert_screenshot(
                &job.job_id,
                &ScreenshotRecord {
                    url: "https://a.example.com".to_string(),
                    filename: "https-a-example-com.png".to_string(),
                    file_path: format!("jobs/{}/shots/https-a-example-com.png", job.job_id),
                    file_size: Some(1024),
                },
                Some(sub.id),
            )
            .await
            .unwrap();
        ts.storage
            .bulk_insert_waf_detections(
                &job.job_id,
                &[WafRecord {
                    url: "https://a.example.com".to_string(),
                    has_waf: true,
                    waf_name: Some("Cloudflare".to_string()),
                    waf_manufacturer: Some("Cloudflare Inc.".to_string()),
                }],
            )
            .await
            .unwrap();

        ts.storage.delete_job(&job.job_id).await.unwrap();

        assert!(matches!(
            ts.storage.get_job(&job.job_id).await,
            Err(StorageError::JobNotFound(_))
        ));
        assert_eq!(ts.storage.count_subdomains(&job.job_id).await.unwrap(), 0);
        assert_eq!(ts.storage.count_screenshots(&job.job_id).await.unwrap(), 0);
        assert!(ts
            .storage
            .list_waf_detections(&job.job_id)
            .await
            .unwrap()
            .is_empty());
        assert!(ts.storage.list_technologies(sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_persisted_subdomain_ends_with_job_domain() {
        let ts = create_test_storage().await;
        let job = create_test_job("example.com");
        ts.storage.insert_job(&job).await.unwrap();

        let names = vec![
            "a.example.com".to_string(),
            "deep.b.example.com".to_string(),
        ];
        ts.storage
            .bulk_insert_subdomains(&job.job_id, &names, "amass")
            .await
            .unwrap();

        let subs = ts.storage.list_subdomains(&job.job_id).await.unwrap();
        assert!(subs.iter().all(|s| s.hostname.ends_with(&job.domain)));
    }
}
