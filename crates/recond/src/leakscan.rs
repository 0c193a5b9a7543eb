//! Selective leak scanner.
//!
//! On-demand path brute-forcing against URLs the operator picks from a
//! completed job's live set. The tool runs from its own installation
//! directory (it expects co-located wordlists), so every path argument
//! is absolute. Findings come from two producers: the live stdout
//! stream, seeded first, and per-status CSV files on disk, which only
//! supply URLs stdout did not already report. The 404 CSV is ignored
//! wholesale.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use recon_core::artifacts::JobDir;
use recon_core::config::Config;
use recon_core::parsers;
use recon_core::progress::ProgressSink;
use recon_core::types::{Id, LeakRecord, ScanMode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline::Result;
use crate::runner::{ToolCommand, ToolRunner};

/// Outcome counts returned to the API caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakScanSummary {
    pub urls_scanned: usize,
    pub leaks_found: usize,
    pub mode: ScanMode,
}

/// URLs the prober recorded for this job, from `live.txt`.
pub fn read_live_urls(live_file: &Path) -> std::io::Result<HashSet<String>> {
    let content = std::fs::read_to_string(live_file)?;
    Ok(parsers::parse_probe_lines(&content)
        .into_iter()
        .map(|r| r.url)
        .collect())
}

/// Keep only requested URLs that appear in the job's live set,
/// preserving request order. Unknown URLs are silently dropped.
pub fn filter_requested_urls(requested: &[String], valid: &HashSet<String>) -> Vec<String> {
    requested
        .iter()
        .filter(|u| valid.contains(*u))
        .cloned()
        .collect()
}

/// Runs the path-brute tool for one job.
pub struct LeakScanner {
    config: Arc<Config>,
    runner: ToolRunner,
}

impl std::fmt::Debug for LeakScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakScanner").finish_non_exhaustive()
    }
}

impl LeakScanner {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            runner: ToolRunner::new(),
        }
    }

    /// Scan the given URLs in the chosen mode and return the merged,
    /// classified findings.
    pub async fn scan(
        &self,
        job_id: &Id,
        urls: &[String],
        mode: ScanMode,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<LeakRecord>> {
        let dirs = JobDir::new(&self.config.jobs_dir, job_id);
        std::fs::create_dir_all(dirs.leaks_dir())?;

        let mut url_list = urls.join("\n");
        url_list.push('\n');
        let urls_path = dirs.urls_no_waf_file();
        std::fs::write(&urls_path, &url_list)?;

        progress.update(
            20,
            &format!("Scanning {} URLs in {} mode...", urls.len(), mode.as_str()),
        );

        let urls_abs = std::fs::canonicalize(&urls_path)?;
        let output_abs = std::fs::canonicalize(dirs.leaks_dir())?;
        let scanner_dir = self
            .config
            .leakscanner_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        let output = self
            .runner
            .run(
                ToolCommand::new("leakscanner", &self.config.python_path)
                    .arg(self.config.leakscanner_path.display().to_string())
                    .arg(format!("--urls={}", urls_abs.display()))
                    .arg(format!("--scale={}", mode.as_str()))
                    .arg("--output")
                    .arg(output_abs.display().to_string())
                    .args(["--threads", &self.config.leakscanner_threads.to_string()])
                    .args(["--timeout", &self.config.leakscanner_timeout_sec.to_string()])
                    .cwd(scanner_dir)
                    .timeout_sec(self.config.leakscanner_timeout_sec),
            )
            .await?;

        progress.update(70, "Classifying findings...");

        let stdout_records = parsers::parse_leak_stdout(&output.stdout);
        let csv_records = collect_csv_records(&dirs.leaks_dir());
        let records = parsers::merge_leak_records(stdout_records, csv_records);

        info!(
            job_id = %job_id,
            urls = urls.len(),
            leaks = records.len(),
            mode = mode.as_str(),
            "leak scan finished"
        );
        Ok(records)
    }
}

/// Visit every `<status>.csv` in the output directory except `404.csv`.
fn collect_csv_records(dir: &Path) -> Vec<LeakRecord> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        // 404 responses are "not found", never leaks.
        if stem == "404" {
            continue;
        }
        let Ok(status) = stem.parse::<u16>() else {
            warn!(file = %path.display(), "skipping CSV with non-numeric status name");
            continue;
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => records.extend(parsers::parse_leak_csv(status, &content)),
            Err(e) => warn!(file = %path.display(), error = %e, "failed to read leak CSV"),
        }
    }

    records
}
