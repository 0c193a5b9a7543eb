//! Output rendering for the reconctl CLI.

use crate::client::{BulkScanResult, ScanCreated, ScanListItem, ScanResult};

/// Print confirmation after submitting a scan.
pub fn print_scan_created(scan: &ScanCreated) {
    println!("Created scan job: {}", scan.job_id);
    println!("  Domain: {}", scan.domain);
    println!("  Status: {}", scan.status);
    println!("  {}", scan.message);
}

/// Print a bulk submit summary.
pub fn print_bulk_result(result: &BulkScanResult) {
    for job in &result.jobs {
        println!("{:<36}  {}", job.job_id, job.domain);
    }
    println!();
    println!("{}", result.message);
}

/// Print scan jobs in tabular format.
pub fn print_scan_list(items: &[ScanListItem]) {
    if items.is_empty() {
        println!("No scan jobs found.");
        return;
    }

    println!(
        "{:<36}  {:<28}  {:<10}  {:>5}  {:>6}  {:<25}",
        "JOB ID", "DOMAIN", "STATUS", "SUBS", "SHOTS", "CREATED"
    );
    println!("{}", "-".repeat(120));

    for item in items {
        println!(
            "{:<36}  {:<28}  {:<10}  {:>5}  {:>6}  {:<25}",
            item.job_id,
            truncate(&item.domain, 28),
            item.status,
            item.subdomains_count,
            item.screenshots_count,
            item.created_at,
        );
    }

    println!();
    println!("{} job(s)", items.len());
}

/// Print full scan results.
pub fn print_scan_result(result: &ScanResult) {
    println!("Scan job: {}", result.job_id);
    println!();
    println!("  Domain:    {}", result.domain);
    println!("  Status:    {}", result.status);
    println!("  Created:   {}", result.created_at);
    if let Some(completed) = &result.completed_at {
        println!("  Completed: {}", completed);
    }
    if let Some(error) = &result.error_message {
        println!("  Error:     {}", error);
    }

    if !result.subdomains.is_empty() {
        println!();
        println!("  Subdomains ({}):", result.subdomains.len());
        println!(
            "    {:<40}  {:<6}  {:<6}  {:<12}",
            "HOSTNAME", "STATUS", "HTTP", "SOURCE"
        );
        println!("    {}", "-".repeat(75));
        for sub in &result.subdomains {
            println!(
                "    {:<40}  {:<6}  {:<6}  {:<12}",
                truncate(&sub.subdomain, 40),
                sub.status,
                sub.http_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                sub.discovered_by.as_deref().unwrap_or("-"),
            );
        }
    }

    if !result.waf_detections.is_empty() {
        println!();
        println!("  WAF detections ({}):", result.waf_detections.len());
        for waf in &result.waf_detections {
            let name = waf.waf_name.as_deref().unwrap_or("-");
            let marker = if waf.has_waf { "yes" } else { "no" };
            println!("    {:<50}  waf={:<3}  {}", truncate(&waf.url, 50), marker, name);
        }
    }

    if !result.leak_detections.is_empty() {
        println!();
        println!("  Leaks ({}):", result.leak_detections.len());
        println!("    {:<8}  {:<6}  {}", "SEVERITY", "HTTP", "URL");
        println!("    {}", "-".repeat(80));
        for leak in &result.leak_detections {
            println!(
                "    {:<8}  {:<6}  {}",
                leak.severity,
                leak.http_status,
                truncate(&leak.leaked_file_url, 60),
            );
        }
    }

    if !result.screenshots.is_empty() {
        println!();
        println!("  Screenshots ({}):", result.screenshots.len());
        for shot in &result.screenshots {
            println!("    {}", shot.file_path);
        }
    }
}

/// Print a progress document as indented JSON.
pub fn print_progress(progress: &serde_json::Value) {
    match serde_json::to_string_pretty(progress) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{progress}"),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
