//! Durable task dispatcher.
//!
//! Tasks live in the daemon's sqlite database: typed, JSON-encoded
//! payloads routed to named priority queues. Claiming is serialized so
//! each worker holds exactly one in-flight task and nothing is
//! prefetched beyond it. Acknowledgement is late by construction: a
//! task stays STARTED until its worker reports an outcome, and
//! anything still in flight when the daemon boots is re-queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recon_core::types::{Id, ScanMode, TaskKind, TaskState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::{Storage, StorageError};

/// Queue priority range is 0..=10; unspecified tasks run at 5.
pub const DEFAULT_PRIORITY: u8 = 5;
pub const MAX_PRIORITY: u8 = 10;

/// Hard per-task deadline; the worker kills the task at this point and
/// late-ack puts it back on the queue.
pub const TASK_TIME_LIMIT: Duration = Duration::from_secs(45 * 60);
/// Advisory deadline; the task is warned and may wind down cleanly.
pub const TASK_SOFT_TIME_LIMIT: Duration = Duration::from_secs(40 * 60);

/// A worker recycles its loop state after this many completed tasks to
/// bound memory growth.
pub const WORKER_MAX_TASKS: u32 = 50;

/// Retry countdown is linear: `60 * attempt` seconds.
pub const RETRY_COUNTDOWN_BASE_SEC: i64 = 60;

/// Default retry budget for scan tasks.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("dispatcher shutdown")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// One unit of work tracked by the dispatcher.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Id,
    pub kind: TaskKind,
    pub priority: u8,
    pub state: TaskState,
    pub payload_json: String,
    pub progress_json: Option<String>,
    pub result_json: Option<String>,
    pub error: Option<String>,
    /// 1-indexed once claimed; incremented on every claim.
    pub attempt: u32,
    pub max_retries: u32,
    /// Earliest instant the task may be claimed (retry backoff).
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether another attempt is allowed after this one failed.
    pub fn can_retry(&self) -> bool {
        self.attempt <= self.max_retries
    }

    /// Linear backoff for the next attempt.
    pub fn retry_countdown(&self) -> chrono::Duration {
        chrono::Duration::seconds(RETRY_COUNTDOWN_BASE_SEC * i64::from(self.attempt))
    }
}

// --- Task payloads ---

/// Payload for the full-scan pipeline and its stage-level tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPayload {
    pub job_id: Id,
    pub domain: String,
}

/// Payload for the selective leak scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakScanPayload {
    pub job_id: Id,
    pub urls: Vec<String>,
    pub mode: ScanMode,
}

/// Payload for old-job cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenancePayload {
    pub days_old: i64,
}

/// Progress heartbeat published by a running task. Readers observe the
/// most recent value only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u8,
    pub total: u8,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls_scanned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Dispatcher over the durable task store.
pub struct Dispatcher {
    storage: Arc<Storage>,
    /// Serializes claim operations across workers.
    claim_lock: Mutex<()>,
    /// Cancellation handles for in-flight tasks, for revocation.
    active: Mutex<HashMap<String, CancellationToken>>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            claim_lock: Mutex::new(()),
            active: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Enqueue a task with the default priority and retry budget.
    pub async fn enqueue(&self, kind: TaskKind, payload: &impl Serialize) -> Result<Task> {
        self.enqueue_with(kind, payload, DEFAULT_PRIORITY, DEFAULT_MAX_RETRIES)
            .await
    }

    /// Enqueue a task with explicit priority (clamped to 0..=10) and
    /// retry budget.
    pub async fn enqueue_with(
        &self,
        kind: TaskKind,
        payload: &impl Serialize,
        priority: u8,
        max_retries: u32,
    ) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Id::new(),
            kind,
            priority: priority.min(MAX_PRIORITY),
            state: TaskState::Pending,
            payload_json: serde_json::to_string(payload)?,
            progress_json: None,
            result_json: None,
            error: None,
            attempt: 0,
            max_retries,
            available_at: now,
            started_at: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_task(&task).await?;
        info!(task_id = %task.id, kind = kind.as_str(), queue = kind.queue(), "task enqueued");
        Ok(task)
    }

    /// Claim the next due task, highest priority first, FIFO within a
    /// priority. Returns None when nothing is due.
    ///
    /// Claiming transitions the task to STARTED and bumps its attempt
    /// counter; the claim lock keeps two workers from grabbing the
    /// same row.
    pub async fn claim_next(&self) -> Result<Option<Task>> {
        if self.is_shutdown() {
            return Err(DispatchError::Shutdown);
        }

        let _lock = self.claim_lock.lock().await;
        let task = self.storage.claim_due_task(Utc::now()).await?;
        if let Some(task) = &task {
            info!(
                task_id = %task.id,
                kind = task.kind.as_str(),
                attempt = task.attempt,
                "task claimed"
            );
        }
        Ok(task)
    }

    /// Publish a progress heartbeat. Best effort: failures are logged
    /// and swallowed so a slow database never stalls the pipeline.
    pub async fn heartbeat(&self, task_id: &Id, progress: &TaskProgress) {
        let json = match serde_json::to_string(progress) {
            Ok(json) => json,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "failed to encode heartbeat");
                return;
            }
        };
        if let Err(e) = self.storage.set_task_progress(task_id.as_ref(), &json).await {
            warn!(task_id = %task_id, error = %e, "failed to publish heartbeat");
        }
    }

    /// Record a successful completion.
    pub async fn succeed(&self, task_id: &Id, result: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(result)?;
        self.storage.mark_task_success(task_id.as_ref(), &json).await?;
        Ok(())
    }

    /// Record a terminal failure.
    pub async fn fail(&self, task_id: &Id, error: &str) -> Result<()> {
        self.storage.mark_task_failure(task_id.as_ref(), error).await?;
        Ok(())
    }

    /// Schedule a retry for a failed attempt: RETRY state, linear
    /// backoff countdown, attempt count surfaced to progress readers.
    pub async fn retry(&self, task: &Task, error: &str) -> Result<()> {
        let available_at = Utc::now() + task.retry_countdown();
        let progress = TaskProgress {
            current: 0,
            total: 100,
            status: format!(
                "Retrying... (attempt {}/{})",
                task.attempt, task.max_retries
            ),
            error: Some(error.to_string()),
            retry_count: Some(task.attempt),
            ..TaskProgress::default()
        };
        let progress_json = serde_json::to_string(&progress)?;

        self.storage
            .schedule_task_retry(task.id.as_ref(), available_at, error, &progress_json)
            .await?;
        info!(
            task_id = %task.id,
            attempt = task.attempt,
            countdown_sec = task.retry_countdown().num_seconds(),
            "task scheduled for retry"
        );
        Ok(())
    }

    /// Register an in-flight task and get its cancellation token.
    pub async fn register_active(&self, task_id: &Id) -> CancellationToken {
        let token = CancellationToken::new();
        self.active
            .lock()
            .await
            .insert(task_id.to_string(), token.clone());
        token
    }

    /// Drop the cancellation handle once the task has settled.
    pub async fn unregister_active(&self, task_id: &Id) {
        self.active.lock().await.remove(task_id.as_ref());
    }

    /// Force-terminate a task: cancel it if in flight, and mark any
    /// non-terminal record as failed.
    pub async fn revoke(&self, task_id: &str) -> Result<()> {
        if let Some(token) = self.active.lock().await.get(task_id) {
            token.cancel();
        }

        match self.storage.get_task(task_id).await {
            Ok(task) if !task.state.is_terminal() => {
                self.storage.mark_task_failure(task_id, "revoked").await?;
                info!(task_id = %task_id, "task revoked");
            }
            Ok(_) => {}
            // Revoking a task the store never saw is a no-op.
            Err(StorageError::TaskNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Startup recovery: anything a dead worker left in flight goes
    /// back on the queue (late acknowledgement).
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let requeued = self.storage.requeue_in_flight_tasks().await?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), "re-queued interrupted tasks");
        }
        Ok(requeued)
    }

    /// Read the current state of a task.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        Ok(self.storage.get_task(task_id).await?)
    }
}
