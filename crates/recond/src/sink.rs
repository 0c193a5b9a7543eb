//! Merge-dedup sink for streaming enumerator output.
//!
//! Appends lines to a persistent set-file iff they are not already
//! present, so several producers can funnel into one authoritative
//! list. Concurrent merges to the same target serialize on an
//! advisory lock held over a sibling `.lock` file. The lock wait and
//! the file work run on the blocking pool; holding an flock on a
//! runtime thread could stall every other task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SinkError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sink".to_string());
    target.with_file_name(format!("{name}.lock"))
}

/// Merge lines into the target set-file.
///
/// Blank and whitespace-only lines are skipped; line terminators are
/// normalized to `\n`. The final file holds the union of its previous
/// contents and the new lines, one entry per line, no duplicates.
/// Returns how many lines were actually appended.
pub async fn merge_lines(content: &str, target: &Path) -> Result<u64> {
    let content = content.to_string();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || merge_lines_blocking(&content, &target))
        .await
        .map_err(|e| SinkError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

/// Merge another file's lines into the target set-file.
pub async fn merge_file(source: &Path, target: &Path) -> Result<u64> {
    let content = match tokio::fs::read_to_string(source).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_err(source)(e)),
    };
    merge_lines(&content, target).await
}

fn merge_lines_blocking(content: &str, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let lock_file_path = lock_path(target);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_file_path)
        .map_err(io_err(&lock_file_path))?;
    lock_file
        .lock_exclusive()
        .map_err(io_err(&lock_file_path))?;

    let existing: HashSet<String> = match std::fs::read_to_string(target) {
        Ok(content) => content.lines().map(|l| l.trim().to_string()).collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => return Err(io_err(target)(e)),
    };

    let mut fresh: Vec<&str> = Vec::new();
    let mut seen_now: HashSet<&str> = HashSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || existing.contains(line) || !seen_now.insert(line) {
            continue;
        }
        fresh.push(line);
    }

    if !fresh.is_empty() {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .map_err(io_err(target))?;
        let mut buf = fresh.join("\n");
        buf.push('\n');
        file.write_all(buf.as_bytes()).map_err(io_err(target))?;
        file.flush().map_err(io_err(target))?;
    }

    debug!(
        target = %target.display(),
        appended = fresh.len(),
        "merged lines into set-file"
    );

    // Lock releases when lock_file drops.
    Ok(fresh.len() as u64)
}
