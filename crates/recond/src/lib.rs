//! recond - subdomain reconnaissance orchestration daemon.
//!
//! Library components: the external tool runner, the merge-dedup sink,
//! the per-job pipeline, the selective leak scanner, the durable task
//! dispatcher with its worker pool, the sqlite repository, and the
//! HTTP API facade.

pub mod dispatcher;
pub mod leakscan;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod sink;
pub mod storage;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use recon_core::config::Config;
use recon_core::types::ScanStatus;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::server::AppState;
use crate::storage::Storage;
use crate::worker::Worker;

/// Type alias for application-level errors with context.
pub type AppResult<T> = eyre::Result<T>;

/// Daemon process configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path to the sqlite database.
    pub db_path: PathBuf,
    /// HTTP server port.
    pub port: u16,
    /// Worker pool size; each worker runs one task at a time.
    pub workers: usize,
    /// Optional bearer token for the HTTP API.
    pub auth_token: Option<String>,
    /// Optional key=value tool config file.
    pub tool_config_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            port: 7700,
            workers: 2,
            auth_token: std::env::var("RECOND_TOKEN").ok(),
            tool_config_path: std::env::var("RECOND_CONFIG").ok().map(PathBuf::from),
        }
    }
}

impl DaemonConfig {
    /// Defaults with `RECOND_DB_PATH`, `RECOND_PORT`, and
    /// `RECOND_WORKERS` applied on top.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("RECOND_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(port) = std::env::var("RECOND_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!(value = %port, "ignoring invalid RECOND_PORT"),
            }
        }
        if let Ok(workers) = std::env::var("RECOND_WORKERS") {
            match workers.parse() {
                Ok(workers) => config.workers = workers,
                Err(_) => warn!(value = %workers, "ignoring invalid RECOND_WORKERS"),
            }
        }
        config
    }
}

/// Default database path (~/.local/share/recond/recond.db).
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recond")
        .join("recond.db")
}

/// Daemon state.
pub struct Daemon {
    config: DaemonConfig,
    tools: Arc<Config>,
    storage: Arc<Storage>,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Create a new daemon with the given configuration.
    pub async fn new(config: DaemonConfig) -> AppResult<Self> {
        let storage = Storage::new(&config.db_path).await?;
        storage.migrate_embedded().await?;
        let storage = Arc::new(storage);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&storage)));

        let mut tools = match &config.tool_config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        tools.apply_env();
        std::fs::create_dir_all(&tools.jobs_dir)?;

        Ok(Self {
            config,
            tools: Arc::new(tools),
            storage,
            dispatcher,
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the daemon: recover interrupted work, start the worker
    /// pool, and serve the HTTP API until shutdown.
    pub async fn run(&self) -> AppResult<()> {
        info!(
            port = self.config.port,
            workers = self.config.workers,
            "recond starting"
        );

        self.recover_from_restart().await?;

        let mut worker_handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let worker = Worker::new(
                id,
                Arc::clone(&self.storage),
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.tools),
            );
            worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }

        let state = Arc::new(AppState {
            storage: Arc::clone(&self.storage),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.tools),
            auth_token: self.config.auth_token.clone(),
        });
        let result = server::start_server(state, self.config.port).await;

        self.dispatcher.shutdown();
        for handle in worker_handles {
            handle.abort();
        }

        result.map_err(|e| eyre::eyre!("HTTP server error: {e}"))
    }

    /// Signal the worker pool to stop.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Startup recovery: late-ack re-queue for interrupted tasks, and
    /// a failure marker for jobs whose task is gone for good.
    async fn recover_from_restart(&self) -> AppResult<()> {
        self.dispatcher.recover_interrupted().await?;

        for job in self.storage.list_running_jobs().await? {
            let task_alive = match &job.task_id {
                Some(task_id) => match self.dispatcher.get_task(task_id).await {
                    Ok(task) => !task.state.is_terminal(),
                    Err(_) => false,
                },
                None => false,
            };
            if !task_alive {
                warn!(job_id = %job.job_id, "marking orphaned running job as failed");
                self.storage
                    .update_job_status(
                        &job.job_id,
                        ScanStatus::Failed,
                        Some("daemon restarted while the scan was running"),
                    )
                    .await?;
            }
        }

        Ok(())
    }
}
