//! Per-job artifact directory layout.
//!
//! Every job owns `jobs/{job_id}/` with fixed file names for each
//! pipeline stage, so intermediate files have stable relative paths
//! for static serving and for the selective leak scanner to find.

use std::io;
use std::path::{Path, PathBuf};

use crate::types::Id;

/// Paths inside one job's artifact directory.
#[derive(Debug, Clone)]
pub struct JobDir {
    root: PathBuf,
}

impl JobDir {
    pub fn new(jobs_dir: &Path, job_id: &Id) -> Self {
        Self {
            root: jobs_dir.join(job_id.as_ref()),
        }
    }

    /// Create the directory tree (root, screenshots, leak output).
    pub fn create(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.shots_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Authoritative deduplicated subdomain set after enumeration.
    pub fn subs_file(&self) -> PathBuf {
        self.root.join("subs.txt")
    }

    /// Raw output of the graph-form enumerator.
    pub fn amass_raw_file(&self) -> PathBuf {
        self.root.join("amass_raw.txt")
    }

    /// Graph-form output filtered to apex FQDNs.
    pub fn amass_file(&self) -> PathBuf {
        self.root.join("amass.txt")
    }

    /// HTTP prober line-delimited JSON output.
    pub fn live_file(&self) -> PathBuf {
        self.root.join("live.txt")
    }

    /// Deduplicated live URLs, input to the WAF fingerprinter.
    pub fn live_urls_file(&self) -> PathBuf {
        self.root.join("live_urls.txt")
    }

    /// WAF fingerprinter JSON report.
    pub fn waf_results_file(&self) -> PathBuf {
        self.root.join("waf_results.json")
    }

    /// URL list handed to the leak scanner.
    pub fn urls_no_waf_file(&self) -> PathBuf {
        self.root.join("urls_no_waf.txt")
    }

    /// Leak scanner output directory (per-status CSVs).
    pub fn leaks_dir(&self) -> PathBuf {
        self.root.join("leaks_results")
    }

    /// URL list handed to the screenshot tool.
    pub fn screenshot_urls_file(&self) -> PathBuf {
        self.root.join("urls_for_gowitness.txt")
    }

    /// Screenshot output directory.
    pub fn shots_dir(&self) -> PathBuf {
        self.root.join("shots")
    }

    /// Relative path of a screenshot for static serving.
    pub fn screenshot_rel_path(&self, job_id: &Id, filename: &str) -> String {
        format!("jobs/{}/shots/{}", job_id, filename)
    }
}

/// Decode a screenshot filename back into a URL, best effort.
///
/// The capture tool encodes `https://a.example.com` as
/// `https-a-example-com.png`. The decoding is lossy (a dash in a host
/// is indistinguishable from an encoded dot), so the result is a
/// display aid only, never an identity.
pub fn decode_screenshot_url(filename: &str) -> String {
    let stem = filename
        .strip_suffix(".png")
        .or_else(|| filename.strip_suffix(".jpeg"))
        .or_else(|| filename.strip_suffix(".jpg"))
        .unwrap_or(filename);

    if let Some(rest) = stem.strip_prefix("https-") {
        format!("https://{}", rest.replace('-', "."))
    } else if let Some(rest) = stem.strip_prefix("http-") {
        format!("http://{}", rest.replace('-', "."))
    } else {
        stem.replace('-', ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_dir_layout_is_stable() {
        let job_id = Id::from_string("job-123");
        let dirs = JobDir::new(Path::new("/data/jobs"), &job_id);
        assert_eq!(dirs.root(), Path::new("/data/jobs/job-123"));
        assert_eq!(dirs.subs_file(), Path::new("/data/jobs/job-123/subs.txt"));
        assert_eq!(dirs.amass_file(), Path::new("/data/jobs/job-123/amass.txt"));
        assert_eq!(dirs.live_file(), Path::new("/data/jobs/job-123/live.txt"));
        assert_eq!(
            dirs.waf_results_file(),
            Path::new("/data/jobs/job-123/waf_results.json")
        );
        assert_eq!(
            dirs.leaks_dir(),
            Path::new("/data/jobs/job-123/leaks_results")
        );
        assert_eq!(dirs.shots_dir(), Path::new("/data/jobs/job-123/shots"));
    }

    #[test]
    fn screenshot_rel_path_is_rooted_under_jobs() {
        let job_id = Id::from_string("j1");
        let dirs = JobDir::new(Path::new("/data/jobs"), &job_id);
        assert_eq!(
            dirs.screenshot_rel_path(&job_id, "https-a-example-com.png"),
            "jobs/j1/shots/https-a-example-com.png"
        );
    }

    #[test]
    fn create_builds_directory_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let job_id = Id::new();
        let dirs = JobDir::new(tmp.path(), &job_id);
        dirs.create().unwrap();
        assert!(dirs.root().is_dir());
        assert!(dirs.shots_dir().is_dir());
    }

    #[test]
    fn decode_screenshot_url_round_trips_scheme() {
        assert_eq!(
            decode_screenshot_url("https-a-example-com.png"),
            "https://a.example.com"
        );
        assert_eq!(
            decode_screenshot_url("http-example-com.jpg"),
            "http://example.com"
        );
        assert_eq!(decode_screenshot_url("bare-name.png"), "bare.name");
    }
}
