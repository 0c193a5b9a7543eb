//! Per-job reconnaissance pipeline.
//!
//! Four stages over one apex domain: enumerate subdomains with three
//! concurrent producers merged through the dedup sink, probe every
//! hostname over HTTP, fingerprint WAFs on the probed URLs, and
//! capture screenshots. Stage fatality differs: enumeration tolerates
//! partial producer failure, a probe tool failure ends the job, WAF
//! failure degrades to an empty set, screenshots are best effort.
//!
//! Selective leak scanning is deliberately not part of this pipeline;
//! it runs on demand through its own subsystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use recon_core::artifacts::{decode_screenshot_url, JobDir};
use recon_core::config::{AmassMode, Config};
use recon_core::parsers;
use recon_core::progress::ProgressSink;
use recon_core::types::{Id, ProbeRecord, ScreenshotRecord, WafRecord};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::runner::{ToolCommand, ToolError, ToolRunner};
use crate::sink::{self, SinkError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Transient failures the worker layer may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tool(e) => e.is_retryable(),
            Self::Io(_) => true,
            Self::Sink(_) => true,
            Self::Parse(_) => false,
        }
    }
}

/// Everything a full pipeline run produced, partial results included.
///
/// `errors` drives the job's final status: any entry means the job
/// failed with the joined message.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub subdomains: Vec<String>,
    pub hosts: Vec<ProbeRecord>,
    pub waf_detections: Vec<WafRecord>,
    pub screenshots: Vec<ScreenshotRecord>,
    pub errors: Vec<String>,
}

impl PipelineReport {
    pub fn live_host_count(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_live).count()
    }
}

/// Pipeline state machine for one job.
pub struct ScanPipeline {
    job_id: Id,
    domain: String,
    dirs: JobDir,
    config: Arc<Config>,
    runner: ToolRunner,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPipeline")
            .field("job_id", &self.job_id)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl ScanPipeline {
    /// Build a pipeline and create the job's artifact directory.
    pub fn new(
        job_id: Id,
        domain: String,
        config: Arc<Config>,
        progress: Arc<dyn ProgressSink>,
    ) -> std::io::Result<Self> {
        let dirs = JobDir::new(&config.jobs_dir, &job_id);
        dirs.create()?;
        Ok(Self {
            job_id,
            domain,
            dirs,
            config,
            runner: ToolRunner::new(),
            progress,
        })
    }

    pub fn dirs(&self) -> &JobDir {
        &self.dirs
    }

    fn report_progress(&self, percent: u8, message: &str) {
        self.progress.update(percent, message);
        info!(job_id = %self.job_id, percent = percent, "{message}");
    }

    /// Run the full pipeline: enumerate, probe, WAF, screenshots.
    ///
    /// Never returns Err; failures land in the report's error list so
    /// partial results survive for the caller to persist.
    pub async fn run_full(&self) -> PipelineReport {
        let mut report = PipelineReport::default();

        self.report_progress(10, "Starting subdomain enumeration...");
        let subdomains = self.enumerate().await;
        if subdomains.is_empty() {
            report.errors.push("No subdomains found".to_string());
            return report;
        }
        report.subdomains = subdomains;

        self.report_progress(
            40,
            &format!(
                "Checking live hosts for {} subdomains...",
                report.subdomains.len()
            ),
        );
        match self.probe(&report.subdomains).await {
            Ok(hosts) if hosts.is_empty() => {
                report.errors.push("No live hosts found".to_string());
                return report;
            }
            Ok(hosts) => report.hosts = hosts,
            Err(e) => {
                // A dead prober blinds every later stage; the job fails.
                report.errors.push(format!("Live host check error: {e}"));
                return report;
            }
        }
        self.report_progress(
            75,
            &format!("Found {} live hosts", report.hosts.len()),
        );

        self.report_progress(78, "Fingerprinting WAFs...");
        match self.detect_waf(&report.hosts).await {
            Ok(detections) => report.waf_detections = detections,
            Err(e) => {
                // Recoverable: continue with an empty WAF set.
                warn!(job_id = %self.job_id, error = %e, "WAF detection failed");
                report.errors.push(format!("WAF detection error: {e}"));
            }
        }
        self.report_progress(85, "WAF fingerprinting done");

        self.report_progress(
            90,
            &format!("Capturing screenshots for {} URLs...", report.hosts.len()),
        );
        report.screenshots = self.capture_screenshots(&report.hosts).await;

        self.report_progress(100, "Pipeline completed");
        report
    }

    // --- Stage 1: enumerate ---

    /// Run the three enumerators concurrently, each feeding the dedup
    /// sink, and read back the authoritative subdomain set.
    ///
    /// Any single producer may fail; only an empty union is fatal for
    /// the caller.
    pub async fn enumerate(&self) -> Vec<String> {
        let (subfinder, amass, assetfinder) = tokio::join!(
            self.run_subfinder(),
            self.run_amass(),
            self.run_assetfinder(),
        );

        for (tool, result) in [
            ("subfinder", subfinder),
            ("amass", amass),
            ("assetfinder", assetfinder),
        ] {
            if let Err(e) = result {
                error!(job_id = %self.job_id, tool = tool, error = %e, "enumerator failed");
            }
        }

        self.read_subdomain_set().await
    }

    async fn run_subfinder(&self) -> Result<()> {
        self.report_progress(15, "Running subfinder...");
        let output = self
            .runner
            .run(
                ToolCommand::new("subfinder", &self.config.subfinder_path)
                    .args(["-d", &self.domain, "-silent"])
                    .cwd(self.dirs.root())
                    .timeout_sec(self.config.subfinder_timeout_sec),
            )
            .await?;

        let hostnames = parsers::parse_enum_hostnames(&output.stdout);
        sink::merge_lines(&hostnames.join("\n"), &self.dirs.subs_file()).await?;
        Ok(())
    }

    async fn run_amass(&self) -> Result<()> {
        let mode = self.config.amass_mode;
        self.report_progress(25, &format!("Running amass ({} mode)...", mode.as_str()));

        let mut cmd = ToolCommand::new("amass", &self.config.amass_path)
            .args(["enum", "-d", &self.domain])
            .cwd(self.dirs.root())
            .timeout_sec(self.config.amass_timeout_sec);
        cmd = match mode {
            AmassMode::Passive => cmd.arg("-passive"),
            AmassMode::Active => cmd
                .arg("-active")
                .args([
                    "-max-dns-queries",
                    &self.config.amass_max_dns_queries.to_string(),
                ]),
        };
        cmd = cmd.args(["-timeout", &self.config.amass_timeout_min.to_string()]);

        let output = self.runner.run(cmd).await?;

        // Keep the raw stream, then the apex-filtered FQDN set, then merge.
        tokio::fs::write(self.dirs.amass_raw_file(), &output.stdout).await?;
        let hostnames = parsers::parse_graph_hostnames(&output.stdout, &self.domain);
        let mut filtered = hostnames.join("\n");
        filtered.push('\n');
        tokio::fs::write(self.dirs.amass_file(), &filtered).await?;
        sink::merge_file(&self.dirs.amass_file(), &self.dirs.subs_file()).await?;
        Ok(())
    }

    async fn run_assetfinder(&self) -> Result<()> {
        self.report_progress(35, "Running assetfinder...");
        let output = self
            .runner
            .run(
                ToolCommand::new("assetfinder", &self.config.assetfinder_path)
                    .args(["--subs-only", &self.domain])
                    .cwd(self.dirs.root())
                    .timeout_sec(self.config.assetfinder_timeout_sec),
            )
            .await?;

        let hostnames = parsers::parse_enum_hostnames(&output.stdout);
        sink::merge_lines(&hostnames.join("\n"), &self.dirs.subs_file()).await?;
        Ok(())
    }

    /// The authoritative subdomain set: the merged file, restricted to
    /// hostnames under the job's apex domain.
    async fn read_subdomain_set(&self) -> Vec<String> {
        let content = tokio::fs::read_to_string(self.dirs.subs_file())
            .await
            .unwrap_or_default();
        let mut names: Vec<String> = content
            .lines()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty() && l.ends_with(&self.domain))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    // --- Stage 2: probe ---

    /// Stream the subdomain set into the HTTP prober and parse its
    /// line-delimited JSON output. Hostnames with no record are the
    /// caller's to mark dead.
    pub async fn probe(&self, subdomains: &[String]) -> Result<Vec<ProbeRecord>> {
        self.report_progress(55, "Probing hosts over HTTP...");

        let mut stdin = subdomains.join("\n");
        stdin.push('\n');

        let output = self
            .runner
            .run(
                ToolCommand::new("httpx", &self.config.httpx_path)
                    .args([
                        "-silent",
                        "-title",
                        "-tech-detect",
                        "-json",
                        "-retries",
                        "3",
                        "-timeout",
                        "30",
                        "-follow-redirects",
                    ])
                    .stdin(stdin)
                    .cwd(self.dirs.root())
                    .timeout_sec(self.config.httpx_timeout_sec),
            )
            .await?;

        tokio::fs::write(self.dirs.live_file(), &output.stdout).await?;
        Ok(parsers::parse_probe_lines(&output.stdout))
    }

    // --- Stage 3: WAF fingerprint ---

    /// Write the deduplicated probed URLs and run the fingerprinter on
    /// them. Tool and parser failures bubble up; the full pipeline
    /// downgrades them to an empty WAF set.
    pub async fn detect_waf(&self, hosts: &[ProbeRecord]) -> Result<Vec<WafRecord>> {
        let urls = dedup_urls(hosts);
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut url_list = urls.join("\n");
        url_list.push('\n');
        let input_path = self.dirs.live_urls_file();
        tokio::fs::write(&input_path, &url_list).await?;

        let results_path = self.dirs.waf_results_file();
        // Absolute paths: the fingerprinter resolves its arguments
        // relative to whatever directory it runs from.
        self.runner
            .run(
                ToolCommand::new("wafw00f", &self.config.wafw00f_path)
                    .arg("-i")
                    .arg(absolute(&input_path).display().to_string())
                    .arg("-o")
                    .arg(absolute(&results_path).display().to_string())
                    .args(["-f", "json"])
                    .cwd(self.dirs.root())
                    .timeout_sec(self.config.wafw00f_timeout_sec),
            )
            .await?;

        let content = tokio::fs::read_to_string(&results_path)
            .await
            .unwrap_or_default();
        parsers::parse_waf_report(&content)
            .map_err(|e| PipelineError::Parse(format!("unparseable WAF report: {e}")))
    }

    // --- Stage 4: screenshots ---

    /// Capture screenshots for the probed URLs. Best effort: a failed
    /// tool run yields whatever image files made it to disk.
    pub async fn capture_screenshots(&self, hosts: &[ProbeRecord]) -> Vec<ScreenshotRecord> {
        let urls = dedup_urls(hosts);
        if urls.is_empty() {
            return Vec::new();
        }

        let mut url_list = urls.join("\n");
        url_list.push('\n');
        let urls_path = self.dirs.screenshot_urls_file();
        if let Err(e) = tokio::fs::write(&urls_path, &url_list).await {
            warn!(job_id = %self.job_id, error = %e, "failed to write screenshot URL list");
            return Vec::new();
        }

        let shots_dir = self.dirs.shots_dir();
        let result = self
            .runner
            .run(
                ToolCommand::new("gowitness", &self.config.gowitness_path)
                    .args(["scan", "file", "-f"])
                    .arg(absolute(&urls_path).display().to_string())
                    .arg("--screenshot-path")
                    .arg(absolute(&shots_dir).display().to_string())
                    .args(["--threads", "4", "--timeout", "30"])
                    .timeout_sec(self.config.gowitness_timeout_sec),
            )
            .await;
        if let Err(e) = result {
            warn!(job_id = %self.job_id, error = %e, "screenshot capture failed");
        }

        self.collect_screenshots()
    }

    /// Enumerate image files under the shots directory and derive each
    /// screenshot's URL from the tool's filename encoding.
    fn collect_screenshots(&self) -> Vec<ScreenshotRecord> {
        let mut files = Vec::new();
        collect_image_files(&self.dirs.shots_dir(), &mut files);

        let mut records = Vec::new();
        for path in files {
            let Some(filename) = path.file_name().map(|f| f.to_string_lossy().into_owned())
            else {
                continue;
            };
            let file_size = std::fs::metadata(&path).ok().map(|m| m.len() as i64);
            let rel = path
                .strip_prefix(self.dirs.root())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| format!("shots/{filename}"));

            records.push(ScreenshotRecord {
                url: decode_screenshot_url(&filename),
                filename,
                file_path: format!("jobs/{}/{}", self.job_id, rel),
                file_size,
            });
        }

        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }
}

/// Probed URLs, deduplicated with order preserved.
fn dedup_urls(hosts: &[ProbeRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    hosts
        .iter()
        .map(|h| h.url.clone())
        .filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Recursive walk for screenshot images (the tool may nest folders).
fn collect_image_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_image_files(&path, out);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("png" | "jpg" | "jpeg")
        ) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::progress::{NoopProgress, RecordingProgress};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Drop a fake tool script into the stub bin directory.
    fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A config whose tools are stub scripts emitting canned output.
    fn stub_config(dir: &TempDir) -> Arc<Config> {
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let subfinder = write_stub(&bin, "subfinder", "echo a.example.com\necho b.example.com\n");
        let amass = write_stub(
            &bin,
            "amass",
            "echo 'foo.example.com (FQDN) --> a_record --> 1.2.3.4'\n\
             echo 'evil.other.com (FQDN) --> a_record --> 5.6.7.8'\n",
        );
        let assetfinder = write_stub(&bin, "assetfinder", "echo b.example.com\necho c.example.com\n");
        let httpx = write_stub(
            &bin,
            "httpx",
            "cat > /dev/null\n\
             echo '{\"url\":\"https://a.example.com\",\"status_code\":200,\"title\":\"Home\",\"tech\":[\"nginx\"]}'\n",
        );
        // argv: -i <in> -o <out> -f json
        let wafw00f = write_stub(
            &bin,
            "wafw00f",
            "echo '[{\"url\":\"https://a.example.com\",\"detected\":true,\"firewall\":\"Cloudflare\",\"manufacturer\":\"Cloudflare Inc.\"}]' > \"$4\"\n",
        );
        let gowitness = write_stub(&bin, "gowitness", "exit 0\n");

        let mut config = Config::default();
        config.jobs_dir = dir.path().join("jobs");
        config.subfinder_path = subfinder;
        config.amass_path = amass;
        config.assetfinder_path = assetfinder;
        config.httpx_path = httpx;
        config.wafw00f_path = wafw00f;
        config.gowitness_path = gowitness;
        Arc::new(config)
    }

    fn create_test_pipeline() -> (TempDir, ScanPipeline) {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            config,
            Arc::new(NoopProgress),
        )
        .unwrap();
        (dir, pipeline)
    }

    #[tokio::test]
    async fn full_pipeline_merges_enumerators_and_probes() {
        let (_dir, pipeline) = create_test_pipeline();
        let report = pipeline.run_full().await;

        // Union of all three producers, gated to the apex domain.
        assert_eq!(
            report.subdomains,
            vec![
                "a.example.com",
                "b.example.com",
                "c.example.com",
                "foo.example.com"
            ]
        );
        assert_eq!(report.hosts.len(), 1);
        assert!(report.hosts[0].is_live);
        assert_eq!(report.hosts[0].technologies, vec!["nginx"]);
        assert_eq!(report.waf_detections.len(), 1);
        assert!(report.waf_detections[0].has_waf);
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn graph_enumerator_output_is_gated_to_apex() {
        let (_dir, pipeline) = create_test_pipeline();
        let report = pipeline.run_full().await;
        assert!(!report.subdomains.iter().any(|s| s.contains("other.com")));

        // The filtered file holds only the apex hostname too.
        let amass = std::fs::read_to_string(pipeline.dirs().amass_file()).unwrap();
        assert_eq!(amass.trim(), "foo.example.com");
    }

    #[tokio::test]
    async fn enumeration_tolerates_one_failed_producer() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut broken = (*config).clone();
        broken.subfinder_path = PathBuf::from("/nonexistent/subfinder");

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(broken),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        // subfinder's names are gone, the other producers still land.
        assert_eq!(
            report.subdomains,
            vec!["b.example.com", "c.example.com", "foo.example.com"]
        );
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn empty_enumeration_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut broken = (*config).clone();
        broken.subfinder_path = PathBuf::from("/nonexistent/subfinder");
        broken.amass_path = PathBuf::from("/nonexistent/amass");
        broken.assetfinder_path = PathBuf::from("/nonexistent/assetfinder");

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(broken),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert_eq!(report.errors, vec!["No subdomains found"]);
        assert!(report.hosts.is_empty());
    }

    #[tokio::test]
    async fn prober_with_no_records_fails_the_job() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut silent = (*config).clone();
        silent.httpx_path = write_stub(&dir.path().join("bin"), "httpx-silent", "cat > /dev/null\n");

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(silent),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert_eq!(report.errors, vec!["No live hosts found"]);
    }

    #[tokio::test]
    async fn prober_tool_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut broken = (*config).clone();
        broken.httpx_path = write_stub(
            &dir.path().join("bin"),
            "httpx-broken",
            "cat > /dev/null\nexit 2\n",
        );

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(broken),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Live host check error:"));
        assert!(report.waf_detections.is_empty());
    }

    #[tokio::test]
    async fn waf_failure_degrades_to_empty_set() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut broken = (*config).clone();
        broken.wafw00f_path = write_stub(&dir.path().join("bin"), "wafw00f-broken", "exit 1\n");

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(broken),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert!(report.waf_detections.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("WAF detection error:"));
        // The pipeline still reached the end.
        assert_eq!(report.hosts.len(), 1);
    }

    #[tokio::test]
    async fn screenshot_failure_is_silent() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let mut broken = (*config).clone();
        broken.gowitness_path = write_stub(&dir.path().join("bin"), "gowitness-broken", "exit 1\n");

        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            Arc::new(broken),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert!(report.screenshots.is_empty());
        // No error entry for screenshots.
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn screenshots_are_collected_and_decoded() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        // Stub writes one image into its --screenshot-path argument ($6).
        let mut capturing = (*config).clone();
        capturing.gowitness_path = write_stub(
            &dir.path().join("bin"),
            "gowitness-writing",
            "mkdir -p \"$6\"\nprintf fake > \"$6/https-a-example-com.png\"\n",
        );

        let job_id = Id::new();
        let pipeline = ScanPipeline::new(
            job_id.clone(),
            "example.com".to_string(),
            Arc::new(capturing),
            Arc::new(NoopProgress),
        )
        .unwrap();

        let report = pipeline.run_full().await;
        assert_eq!(report.screenshots.len(), 1);
        let shot = &report.screenshots[0];
        assert_eq!(shot.url, "https://a.example.com");
        assert_eq!(shot.filename, "https-a-example-com.png");
        assert_eq!(
            shot.file_path,
            format!("jobs/{job_id}/shots/https-a-example-com.png")
        );
        assert_eq!(shot.file_size, Some(4));
    }

    #[tokio::test]
    async fn progress_hits_stage_floors_in_order() {
        let dir = TempDir::new().unwrap();
        let config = stub_config(&dir);
        let progress = Arc::new(RecordingProgress::new());
        let pipeline = ScanPipeline::new(
            Id::new(),
            "example.com".to_string(),
            config,
            Arc::clone(&progress) as Arc<dyn ProgressSink>,
        )
        .unwrap();

        pipeline.run_full().await;

        let percents: Vec<u8> = progress.updates().iter().map(|(p, _)| *p).collect();
        for floor in [10, 40, 75, 85, 100] {
            assert!(percents.contains(&floor), "missing floor {floor}");
        }
        let mut sorted = percents.clone();
        sorted.sort_unstable();
        assert_eq!(percents, sorted, "progress must be monotonic");
    }

    #[tokio::test]
    async fn rerunning_enumeration_is_idempotent() {
        let (_dir, pipeline) = create_test_pipeline();
        let first = pipeline.enumerate().await;
        let second = pipeline.enumerate().await;
        assert_eq!(first, second);

        let content = std::fs::read_to_string(pipeline.dirs().subs_file()).unwrap();
        let line_count = content.lines().filter(|l| !l.trim().is_empty()).count();
        assert_eq!(line_count, first.len());
    }
}
