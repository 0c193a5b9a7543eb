//! Worker loop executing dispatched tasks.
//!
//! Each worker holds one claimed task at a time, runs it under the
//! hard deadline with a soft-deadline warning, publishes heartbeats
//! through the dispatcher, and settles the task per the retry policy:
//! the full scan retries any failure up to its budget, the leak scan
//! retries only transient kinds, everything else fails terminally.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recon_core::config::Config;
use recon_core::progress::ProgressSink;
use recon_core::types::{Id, ScanStatus, SubdomainStatus, TaskKind};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::dispatcher::{
    Dispatcher, LeakScanPayload, MaintenancePayload, ScanPayload, Task, TaskProgress,
    TASK_SOFT_TIME_LIMIT, TASK_TIME_LIMIT, WORKER_MAX_TASKS,
};
use crate::leakscan::LeakScanner;
use crate::pipeline::{PipelineError, PipelineReport, ScanPipeline};
use crate::storage::{Storage, StorageError};

/// Poll interval when no task is due.
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
enum TaskError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    /// Retry policy per task kind. The full scan retries anything;
    /// the leak scan retries only connection/timeout/IO kinds.
    fn is_retryable_for(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::FullScan => true,
            TaskKind::LeakScan => matches!(
                self,
                Self::Pipeline(e) if e.is_retryable()
            ) || matches!(self, Self::Io(_)),
            _ => false,
        }
    }
}

type TaskResult = std::result::Result<serde_json::Value, TaskError>;

/// Publishes pipeline progress as dispatcher heartbeats.
///
/// Updates are fire-and-forget: the pipeline never waits on the store.
#[derive(Debug)]
struct HeartbeatProgress {
    dispatcher: Arc<Dispatcher>,
    task_id: Id,
    job_id: Id,
    domain: String,
}

impl ProgressSink for HeartbeatProgress {
    fn update(&self, percent: u8, message: &str) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let task_id = self.task_id.clone();
        let progress = TaskProgress {
            current: percent,
            total: 100,
            status: message.to_string(),
            job_id: Some(self.job_id.to_string()),
            domain: Some(self.domain.clone()),
            ..TaskProgress::default()
        };
        tokio::spawn(async move {
            dispatcher.heartbeat(&task_id, &progress).await;
        });
    }
}

/// One worker in the pool.
pub struct Worker {
    id: usize,
    storage: Arc<Storage>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}

impl Worker {
    pub fn new(
        id: usize,
        storage: Arc<Storage>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            id,
            storage,
            dispatcher,
            config,
        }
    }

    /// Run until shutdown. The inner loop recycles after a bounded
    /// number of completed tasks to keep long-lived state from
    /// accumulating.
    pub async fn run(&self) {
        info!(worker = self.id, "worker started");
        while !self.dispatcher.is_shutdown() {
            let mut completed: u32 = 0;
            while completed < WORKER_MAX_TASKS && !self.dispatcher.is_shutdown() {
                let task = match self.dispatcher.claim_next().await {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(worker = self.id, error = %e, "claim failed");
                        tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
                        continue;
                    }
                };

                self.execute(task).await;
                completed += 1;
            }
            if completed >= WORKER_MAX_TASKS {
                info!(worker = self.id, tasks = completed, "recycling worker");
            }
        }
        info!(worker = self.id, "worker stopped");
    }

    /// Execute one claimed task under cancellation and the hard
    /// deadline, then settle its state.
    pub async fn execute(&self, task: Task) {
        let token = self.dispatcher.register_active(&task.id).await;

        // Soft limit is advisory only.
        let soft_task_id = task.id.clone();
        let soft_timer = tokio::spawn(async move {
            tokio::time::sleep(TASK_SOFT_TIME_LIMIT).await;
            warn!(task_id = %soft_task_id, "task passed its soft time limit");
        });

        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = tokio::time::timeout(TASK_TIME_LIMIT, self.execute_kind(&task)) => {
                Some(match result {
                    Ok(r) => r,
                    Err(_) => Err(TaskError::Fatal(format!(
                        "task exceeded hard time limit of {} seconds",
                        TASK_TIME_LIMIT.as_secs()
                    ))),
                })
            }
        };
        soft_timer.abort();
        self.dispatcher.unregister_active(&task.id).await;

        let Some(result) = outcome else {
            // Revocation already settled the task record.
            info!(task_id = %task.id, "task cancelled");
            return;
        };

        match result {
            Ok(value) => {
                if let Err(e) = self.dispatcher.succeed(&task.id, &value).await {
                    error!(task_id = %task.id, error = %e, "failed to record success");
                }
            }
            Err(task_error) => {
                self.settle_failure(&task, &task_error).await;
            }
        }
    }

    async fn settle_failure(&self, task: &Task, task_error: &TaskError) {
        let message = task_error.to_string();

        if task_error.is_retryable_for(task.kind) && task.can_retry() {
            warn!(
                task_id = %task.id,
                attempt = task.attempt,
                error = %message,
                "task failed, retrying"
            );
            if let Err(e) = self.dispatcher.retry(task, &message).await {
                error!(task_id = %task.id, error = %e, "failed to schedule retry");
            }
            return;
        }

        error!(task_id = %task.id, error = %message, "task failed terminally");
        if let Err(e) = self.dispatcher.fail(&task.id, &message).await {
            error!(task_id = %task.id, error = %e, "failed to record failure");
        }

        // The full scan drags its job down with it; a failed leak scan
        // leaves the job untouched.
        if task.kind == TaskKind::FullScan {
            if let Ok(payload) = serde_json::from_str::<ScanPayload>(&task.payload_json) {
                if let Err(e) = self
                    .storage
                    .update_job_status(&payload.job_id, ScanStatus::Failed, Some(&message))
                    .await
                {
                    warn!(job_id = %payload.job_id, error = %e, "failed to mark job failed");
                }
            }
        }
    }

    async fn execute_kind(&self, task: &Task) -> TaskResult {
        match task.kind {
            TaskKind::FullScan => {
                let payload: ScanPayload = serde_json::from_str(&task.payload_json)
                    .map_err(|e| TaskError::Fatal(format!("bad payload: {e}")))?;
                self.run_full_scan(task, payload).await
            }
            TaskKind::LeakScan => {
                let payload: LeakScanPayload = serde_json::from_str(&task.payload_json)
                    .map_err(|e| TaskError::Fatal(format!("bad payload: {e}")))?;
                self.run_leak_scan(task, payload).await
            }
            TaskKind::Maintenance => {
                let payload: MaintenancePayload = serde_json::from_str(&task.payload_json)
                    .map_err(|e| TaskError::Fatal(format!("bad payload: {e}")))?;
                self.cleanup_old_jobs(payload.days_old).await
            }
            TaskKind::Enumerate => {
                let payload: ScanPayload = serde_json::from_str(&task.payload_json)
                    .map_err(|e| TaskError::Fatal(format!("bad payload: {e}")))?;
                self.run_enumerate_stage(task, payload).await
            }
            TaskKind::ProbeHosts | TaskKind::ScreenshotCapture | TaskKind::WafCheck => {
                let payload: ScanPayload = serde_json::from_str(&task.payload_json)
                    .map_err(|e| TaskError::Fatal(format!("bad payload: {e}")))?;
                self.run_stage(task, payload).await
            }
        }
    }

    fn pipeline_for(
        &self,
        task: &Task,
        job_id: &Id,
        domain: &str,
    ) -> std::io::Result<ScanPipeline> {
        let progress: Arc<dyn ProgressSink> = Arc::new(HeartbeatProgress {
            dispatcher: Arc::clone(&self.dispatcher),
            task_id: task.id.clone(),
            job_id: job_id.clone(),
            domain: domain.to_string(),
        });
        ScanPipeline::new(
            job_id.clone(),
            domain.to_string(),
            Arc::clone(&self.config),
            progress,
        )
    }

    // --- Full scan ---

    async fn run_full_scan(&self, task: &Task, payload: ScanPayload) -> TaskResult {
        let ScanPayload { job_id, domain } = payload;
        self.storage
            .update_job_status(&job_id, ScanStatus::Running, None)
            .await?;

        let pipeline = self.pipeline_for(task, &job_id, &domain)?;
        let report = pipeline.run_full().await;

        self.dispatcher
            .heartbeat(
                &task.id,
                &TaskProgress {
                    current: 95,
                    total: 100,
                    status: "Saving results to database...".to_string(),
                    job_id: Some(job_id.to_string()),
                    domain: Some(domain.clone()),
                    ..TaskProgress::default()
                },
            )
            .await;

        self.persist_report(&job_id, &report).await?;

        let status = if report.errors.is_empty() {
            self.storage
                .update_job_status(&job_id, ScanStatus::Completed, None)
                .await?;
            ScanStatus::Completed
        } else {
            let joined = report.errors.join("; ");
            self.storage
                .update_job_status(&job_id, ScanStatus::Failed, Some(&joined))
                .await?;
            ScanStatus::Failed
        };

        Ok(serde_json::json!({
            "job_id": job_id,
            "domain": domain,
            "status": status.as_str(),
            "errors": report.errors,
            "stats": {
                "total_subdomains": report.subdomains.len(),
                "live_hosts": report.live_host_count(),
                "screenshots_taken": report.screenshots.len(),
                "waf_protected": report.waf_detections.iter().filter(|w| w.has_waf).count(),
            },
        }))
    }

    async fn persist_report(
        &self,
        job_id: &Id,
        report: &PipelineReport,
    ) -> std::result::Result<(), TaskError> {
        if !report.subdomains.is_empty() {
            self.storage
                .bulk_insert_subdomains(job_id, &report.subdomains, "pipeline")
                .await?;
        }

        for host in &report.hosts {
            let subdomain_id = self.storage.apply_probe_record(job_id, host).await?;
            if let Some(subdomain_id) = subdomain_id {
                if !host.technologies.is_empty() {
                    self.storage
                        .bulk_insert_technologies(subdomain_id, &host.technologies)
                        .await?;
                }
            }
        }
        if !report.hosts.is_empty() {
            self.storage.mark_unprobed_dead(job_id).await?;
        }

        for shot in &report.screenshots {
            let hostname = shot
                .url
                .strip_prefix("https://")
                .or_else(|| shot.url.strip_prefix("http://"))
                .unwrap_or(&shot.url);
            let subdomain_id = self
                .storage
                .get_subdomain_by_hostname(job_id, hostname)
                .await?
                .map(|s| s.id);
            self.storage
                .insert_screenshot(job_id, shot, subdomain_id)
                .await?;
        }

        if !report.waf_detections.is_empty() {
            self.storage
                .bulk_insert_waf_detections(job_id, &report.waf_detections)
                .await?;
        }

        Ok(())
    }

    // --- Selective leak scan ---

    async fn run_leak_scan(&self, task: &Task, payload: LeakScanPayload) -> TaskResult {
        let LeakScanPayload { job_id, urls, mode } = payload;
        let job = self.storage.get_job(&job_id).await?;

        let progress = HeartbeatProgress {
            dispatcher: Arc::clone(&self.dispatcher),
            task_id: task.id.clone(),
            job_id: job_id.clone(),
            domain: job.domain.clone(),
        };
        progress.update(
            0,
            &format!(
                "Starting leak scan on {} URLs in {} mode...",
                urls.len(),
                mode.as_str()
            ),
        );

        let scanner = LeakScanner::new(Arc::clone(&self.config));
        let records = scanner.scan(&job_id, &urls, mode, &progress).await?;

        let persisted = self
            .storage
            .bulk_insert_leak_detections(&job_id, &records)
            .await?;
        progress.update(100, &format!("Leak scan completed, {persisted} leaks found"));

        Ok(serde_json::json!({
            "job_id": job_id,
            "domain": job.domain,
            "status": "completed",
            "urls_scanned": urls.len(),
            "leaks_found": persisted,
            "mode": mode.as_str(),
        }))
    }

    // --- Stage-level tasks ---

    async fn run_enumerate_stage(&self, task: &Task, payload: ScanPayload) -> TaskResult {
        let ScanPayload { job_id, domain } = payload;
        let pipeline = self.pipeline_for(task, &job_id, &domain)?;
        let subdomains = pipeline.enumerate().await;
        if !subdomains.is_empty() {
            self.storage
                .bulk_insert_subdomains(&job_id, &subdomains, "pipeline")
                .await?;
        }
        Ok(serde_json::json!({
            "job_id": job_id,
            "domain": domain,
            "count": subdomains.len(),
        }))
    }

    /// Probe, WAF, and screenshot stages run standalone over whatever
    /// the job has persisted so far.
    async fn run_stage(&self, task: &Task, payload: ScanPayload) -> TaskResult {
        let ScanPayload { job_id, domain } = payload;
        let pipeline = self.pipeline_for(task, &job_id, &domain)?;
        let subdomains = self.storage.list_subdomains(&job_id).await?;

        match task.kind {
            TaskKind::ProbeHosts => {
                let hostnames: Vec<String> =
                    subdomains.iter().map(|s| s.hostname.clone()).collect();
                let hosts = pipeline.probe(&hostnames).await?;
                for host in &hosts {
                    self.storage.apply_probe_record(&job_id, host).await?;
                }
                if !hosts.is_empty() {
                    self.storage.mark_unprobed_dead(&job_id).await?;
                }
                Ok(serde_json::json!({"job_id": job_id, "count": hosts.len()}))
            }
            TaskKind::WafCheck => {
                let hosts = probe_records_of(&subdomains);
                let detections = pipeline.detect_waf(&hosts).await?;
                if !detections.is_empty() {
                    self.storage
                        .bulk_insert_waf_detections(&job_id, &detections)
                        .await?;
                }
                Ok(serde_json::json!({"job_id": job_id, "count": detections.len()}))
            }
            TaskKind::ScreenshotCapture => {
                let hosts = probe_records_of(&subdomains);
                let shots = pipeline.capture_screenshots(&hosts).await;
                for shot in &shots {
                    self.storage.insert_screenshot(&job_id, shot, None).await?;
                }
                Ok(serde_json::json!({"job_id": job_id, "count": shots.len()}))
            }
            _ => Err(TaskError::Fatal(format!(
                "unexpected stage kind: {}",
                task.kind.as_str()
            ))),
        }
    }

    // --- Maintenance ---

    /// Delete jobs older than the cutoff along with their artifact
    /// directories.
    async fn cleanup_old_jobs(&self, days_old: i64) -> TaskResult {
        let cutoff = Utc::now() - chrono::Duration::days(days_old);
        let old_jobs = self.storage.list_jobs_older_than(cutoff).await?;

        let mut cleaned = 0;
        for job in &old_jobs {
            if let Some(task_id) = &job.task_id {
                if let Err(e) = self.dispatcher.revoke(task_id).await {
                    warn!(job_id = %job.job_id, error = %e, "failed to revoke task during cleanup");
                }
            }
            let dir = recon_core::JobDir::new(&self.config.jobs_dir, &job.job_id);
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir.root()) {
                    warn!(job_id = %job.job_id, error = %e, "failed to remove job directory");
                }
            }
            self.storage.delete_job(&job.job_id).await?;
            cleaned += 1;
        }

        Ok(serde_json::json!({
            "status": "completed",
            "cleaned_jobs": cleaned,
            "cutoff": cutoff.to_rfc3339(),
        }))
    }
}

/// Minimal probe records reconstructed from persisted live subdomains,
/// for standalone WAF and screenshot stages.
fn probe_records_of(subdomains: &[recon_core::Subdomain]) -> Vec<recon_core::ProbeRecord> {
    subdomains
        .iter()
        .filter(|s| s.status == SubdomainStatus::Live)
        .filter_map(|s| {
            s.url.as_ref().map(|url| recon_core::ProbeRecord {
                url: url.clone(),
                is_live: true,
                ..recon_core::ProbeRecord::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::types::{ScanJob, TaskState};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct TestWorker {
        worker: Worker,
        storage: Arc<Storage>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<Config>,
        _dir: TempDir,
    }

    async fn create_test_worker() -> TestWorker {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let mut config = Config::default();
        config.jobs_dir = dir.path().join("jobs");
        config.subfinder_path =
            write_stub(&bin, "subfinder", "echo a.example.com\necho b.example.com\n");
        config.amass_path = write_stub(&bin, "amass", "true\n");
        config.assetfinder_path = write_stub(&bin, "assetfinder", "true\n");
        config.httpx_path = write_stub(
            &bin,
            "httpx",
            "cat > /dev/null\n\
             echo '{\"url\":\"https://a.example.com\",\"status_code\":200,\"title\":\"Home\",\"tech\":[\"nginx\"]}'\n",
        );
        config.wafw00f_path = write_stub(
            &bin,
            "wafw00f",
            "echo '[{\"url\":\"https://a.example.com\",\"detected\":true,\"firewall\":\"Cloudflare\",\"manufacturer\":\"Cloudflare Inc.\"}]' > \"$4\"\n",
        );
        config.gowitness_path = write_stub(&bin, "gowitness", "exit 0\n");
        let config = Arc::new(config);

        let storage = Storage::new(&dir.path().join("test.db")).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        let storage = Arc::new(storage);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&storage)));

        TestWorker {
            worker: Worker::new(
                0,
                Arc::clone(&storage),
                Arc::clone(&dispatcher),
                Arc::clone(&config),
            ),
            storage,
            dispatcher,
            config,
            _dir: dir,
        }
    }

    async fn insert_pending_job(storage: &Storage, domain: &str) -> ScanJob {
        let now = Utc::now();
        let job = ScanJob {
            job_id: Id::new(),
            task_id: None,
            domain: domain.to_string(),
            status: ScanStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        storage.insert_job(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn full_scan_completes_job_and_persists_results() {
        let tw = create_test_worker().await;
        let job = insert_pending_job(&tw.storage, "example.com").await;

        let task = tw
            .dispatcher
            .enqueue(
                TaskKind::FullScan,
                &ScanPayload {
                    job_id: job.job_id.clone(),
                    domain: job.domain.clone(),
                },
            )
            .await
            .unwrap();
        let claimed = tw.dispatcher.claim_next().await.unwrap().unwrap();
        tw.worker.execute(claimed).await;

        let done = tw.storage.get_job(&job.job_id).await.unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.completed_at.unwrap() >= done.created_at);

        let subs = tw.storage.list_subdomains(&job.job_id).await.unwrap();
        assert_eq!(subs.len(), 2);
        let live = subs.iter().find(|s| s.hostname == "a.example.com").unwrap();
        assert_eq!(live.status, SubdomainStatus::Live);
        assert_eq!(live.http_status, Some(200));
        let dead = subs.iter().find(|s| s.hostname == "b.example.com").unwrap();
        assert_eq!(dead.status, SubdomainStatus::Dead);

        let waf = tw.storage.list_waf_detections(&job.job_id).await.unwrap();
        assert_eq!(waf.len(), 1);
        assert!(waf[0].has_waf);

        let leaks = tw.storage.list_leak_detections(&job.job_id).await.unwrap();
        assert!(leaks.is_empty(), "leak scan must not run in the full pipeline");

        let settled = tw.dispatcher.get_task(task.id.as_ref()).await.unwrap();
        assert_eq!(settled.state, TaskState::Success);
    }

    #[tokio::test]
    async fn full_scan_with_dead_prober_fails_job_but_keeps_partial_results() {
        let tw = create_test_worker().await;
        let job = insert_pending_job(&tw.storage, "example.com").await;

        let mut config = (*tw.config).clone();
        config.httpx_path = PathBuf::from("/nonexistent/httpx");
        let worker = Worker::new(
            1,
            Arc::clone(&tw.storage),
            Arc::clone(&tw.dispatcher),
            Arc::new(config),
        );

        tw.dispatcher
            .enqueue(
                TaskKind::FullScan,
                &ScanPayload {
                    job_id: job.job_id.clone(),
                    domain: job.domain.clone(),
                },
            )
            .await
            .unwrap();
        let claimed = tw.dispatcher.claim_next().await.unwrap().unwrap();
        worker.execute(claimed).await;

        let done = tw.storage.get_job(&job.job_id).await.unwrap();
        assert_eq!(done.status, ScanStatus::Failed);
        let message = done.error_message.unwrap();
        assert!(message.contains("Live host check error"), "{message}");

        // Enumeration results survived the failure.
        assert!(tw.storage.count_subdomains(&job.job_id).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn leak_scan_failure_does_not_touch_job_status() {
        let tw = create_test_worker().await;
        let job = insert_pending_job(&tw.storage, "example.com").await;
        tw.storage
            .update_job_status(&job.job_id, ScanStatus::Running, None)
            .await
            .unwrap();
        tw.storage
            .update_job_status(&job.job_id, ScanStatus::Completed, None)
            .await
            .unwrap();

        // Scanner binary missing: NotFound is not a retryable kind.
        let task = tw
            .dispatcher
            .enqueue(
                TaskKind::LeakScan,
                &LeakScanPayload {
                    job_id: job.job_id.clone(),
                    urls: vec!["https://a.example.com".to_string()],
                    mode: recon_core::ScanMode::Tiny,
                },
            )
            .await
            .unwrap();
        let claimed = tw.dispatcher.claim_next().await.unwrap().unwrap();
        tw.worker.execute(claimed).await;

        let settled = tw.dispatcher.get_task(task.id.as_ref()).await.unwrap();
        assert_eq!(settled.state, TaskState::Failure);

        let untouched = tw.storage.get_job(&job.job_id).await.unwrap();
        assert_eq!(untouched.status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn leak_scan_timeout_schedules_retry() {
        let tw = create_test_worker().await;
        let job = insert_pending_job(&tw.storage, "example.com").await;
        tw.storage
            .update_job_status(&job.job_id, ScanStatus::Running, None)
            .await
            .unwrap();
        tw.storage
            .update_job_status(&job.job_id, ScanStatus::Completed, None)
            .await
            .unwrap();

        let bin = tw._dir.path().join("bin");
        let mut config = (*tw.config).clone();
        config.python_path = write_stub(&bin, "slow-python", "sleep 5\n");
        config.leakscanner_path = bin.join("scanner.py");
        std::fs::write(&config.leakscanner_path, "#").unwrap();
        config.leakscanner_timeout_sec = 0;
        let worker = Worker::new(
            1,
            Arc::clone(&tw.storage),
            Arc::clone(&tw.dispatcher),
            Arc::new(config),
        );

        let task = tw
            .dispatcher
            .enqueue(
                TaskKind::LeakScan,
                &LeakScanPayload {
                    job_id: job.job_id.clone(),
                    urls: vec!["https://a.example.com".to_string()],
                    mode: recon_core::ScanMode::Tiny,
                },
            )
            .await
            .unwrap();
        let claimed = tw.dispatcher.claim_next().await.unwrap().unwrap();
        worker.execute(claimed).await;

        let settled = tw.dispatcher.get_task(task.id.as_ref()).await.unwrap();
        assert_eq!(settled.state, TaskState::Retry);
    }

    #[tokio::test]
    async fn maintenance_removes_old_jobs_and_directories() {
        let tw = create_test_worker().await;

        let now = Utc::now();
        let old_job = ScanJob {
            job_id: Id::new(),
            task_id: None,
            domain: "old.example.com".to_string(),
            status: ScanStatus::Completed,
            error_message: None,
            created_at: now - chrono::Duration::days(30),
            updated_at: now - chrono::Duration::days(30),
            completed_at: Some(now - chrono::Duration::days(30)),
        };
        tw.storage.insert_job(&old_job).await.unwrap();
        let old_dir = recon_core::JobDir::new(&tw.config.jobs_dir, &old_job.job_id);
        old_dir.create().unwrap();

        let fresh_job = insert_pending_job(&tw.storage, "fresh.example.com").await;

        tw.dispatcher
            .enqueue(TaskKind::Maintenance, &MaintenancePayload { days_old: 7 })
            .await
            .unwrap();
        let claimed = tw.dispatcher.claim_next().await.unwrap().unwrap();
        tw.worker.execute(claimed).await;

        assert!(matches!(
            tw.storage.get_job(&old_job.job_id).await,
            Err(StorageError::JobNotFound(_))
        ));
        assert!(!old_dir.exists());
        assert!(tw.storage.get_job(&fresh_job.job_id).await.is_ok());
    }
}
