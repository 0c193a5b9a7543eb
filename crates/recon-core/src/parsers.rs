//! Parsers normalizing external tool output into record shapes.
//!
//! Every parser here is total: malformed input never returns an error
//! for the record in question, it is skipped with a warning. The one
//! exception is the WAF report, which is a single JSON document rather
//! than line-delimited records; the caller treats a parse failure as a
//! recoverable stage error.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::types::{LeakRecord, ProbeRecord, Severity, WafRecord};

/// Status codes that mark a probed host as live: the server responded,
/// whatever it said. 2xx success, 3xx redirects, 4xx client errors, and
/// 5xx server errors all count.
pub const LIVE_STATUS_CODES: &[u16] = &[
    200, 201, 202, 204, 301, 302, 303, 304, 307, 308, 400, 401, 403, 404, 500, 501, 502, 503, 504,
];

pub fn is_live_status(code: u16) -> bool {
    LIVE_STATUS_CODES.contains(&code)
}

// --- Enumerator output ---

/// Parse flat enumerator output: one hostname per line.
///
/// Comment lines (starting with `[`) and blanks are dropped, hostnames
/// are lowercased. Returns a sorted, deduplicated set.
pub fn parse_enum_hostnames(output: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') || !line.contains('.') {
            continue;
        }
        names.insert(line.to_lowercase());
    }
    names.into_iter().collect()
}

fn fqdn_graph_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\s+\(FQDN\)")
            .unwrap()
    })
}

/// Parse mixed flat/graph enumerator output, keeping only names under
/// the job's apex domain.
///
/// Graph lines look like `sub.example.com (FQDN) --> a_record --> 1.2.3.4`;
/// the hostname is the token before the `(FQDN)` marker. Flat lines are
/// treated as in [`parse_enum_hostnames`]. Returns a sorted set.
pub fn parse_graph_hostnames(output: &str, apex: &str) -> Vec<String> {
    let apex = apex.to_lowercase();
    let mut names = BTreeSet::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.contains("-->") {
            if fqdn_graph_pattern().is_match(line) {
                let hostname = line
                    .split("(FQDN)")
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_lowercase();
                if hostname.ends_with(&apex) {
                    names.insert(hostname);
                }
            }
        } else {
            let Some(first) = line.split_whitespace().next() else {
                continue;
            };
            if first.contains('.') {
                let hostname = first.to_lowercase();
                if hostname.ends_with(&apex) {
                    names.insert(hostname);
                }
            }
        }
    }

    names.into_iter().collect()
}

// --- HTTP prober output ---

/// Raw JSON shape of one prober line. Field names follow the tool.
#[derive(Debug, Deserialize)]
struct RawProbeLine {
    url: String,
    status_code: Option<u16>,
    title: Option<String>,
    content_length: Option<i64>,
    webserver: Option<String>,
    final_url: Option<String>,
    /// Duration string, e.g. "11.4100539s".
    time: Option<String>,
    cdn_name: Option<String>,
    content_type: Option<String>,
    host: Option<String>,
    #[serde(default)]
    chain_status_codes: Vec<u16>,
    #[serde(default)]
    a: Vec<String>,
    #[serde(default)]
    aaaa: Vec<String>,
    #[serde(default)]
    tech: Vec<String>,
}

/// Parse line-delimited JSON prober output.
///
/// Each line is a self-contained record; lines that are not valid JSON
/// or lack a `url` field are skipped. Hosts with no record at all are
/// the caller's problem (assumed dead).
pub fn parse_probe_lines(output: &str) -> Vec<ProbeRecord> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawProbeLine = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "skipping malformed prober record");
                continue;
            }
        };

        let is_live = raw.status_code.is_some_and(is_live_status);
        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        records.push(ProbeRecord {
            url: raw.url,
            status_code: raw.status_code,
            is_live,
            title,
            content_length: raw.content_length,
            webserver: raw.webserver,
            final_url: raw.final_url,
            response_time: raw.time,
            cdn_name: raw.cdn_name,
            content_type: raw.content_type,
            host: raw.host,
            chain_status_codes: raw.chain_status_codes,
            ipv4_addresses: raw.a,
            ipv6_addresses: raw.aaaa,
            technologies: raw.tech,
        });
    }

    records
}

// --- WAF fingerprinter output ---

#[derive(Debug, Deserialize)]
struct RawWafEntry {
    url: Option<String>,
    #[serde(default)]
    detected: bool,
    firewall: Option<String>,
    manufacturer: Option<String>,
}

/// Parse the fingerprinter's JSON report (an array of per-URL objects).
///
/// A URL is WAF-protected iff `detected` and the firewall name is not
/// the literal "None". Returns an error only when the document itself
/// is not valid JSON; the caller downgrades that to an empty WAF set.
pub fn parse_waf_report(content: &str) -> Result<Vec<WafRecord>, serde_json::Error> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value = serde_json::from_str(content)?;
    let entries = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut records = Vec::new();
    for entry in entries {
        let raw: RawWafEntry = match serde_json::from_value(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "skipping malformed WAF record");
                continue;
            }
        };
        let Some(url) = raw.url else {
            continue;
        };

        let firewall = raw.firewall.filter(|f| f != "None");
        let manufacturer = raw.manufacturer.filter(|m| m != "None");
        let has_waf = raw.detected && firewall.is_some();

        records.push(WafRecord {
            url,
            has_waf,
            waf_name: firewall,
            waf_manufacturer: manufacturer,
        });
    }

    Ok(records)
}

// --- Path-brute tool output ---

fn leak_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [403] 0 0.07s text/html https://example.com/.htaccess
    RE.get_or_init(|| Regex::new(r"^\[(\d+)\]\s+(\d+)\s+([\d.]+)s?\s+(\S+)\s+(.+)$").unwrap())
}

/// Severity for a leak finding, derived from HTTP status and URL.
///
/// Base: 200 is high (readable file), 403 is medium (exists but
/// forbidden), anything else low. Sensitive names then upgrade
/// medium to high and low to medium; archive extensions upgrade low
/// to medium.
pub fn leak_severity(http_status: u16, url: &str) -> Severity {
    let mut severity = match http_status {
        200 => Severity::High,
        403 => Severity::Medium,
        _ => Severity::Low,
    };

    let lower = url.to_lowercase();
    let sensitive = [".sql", ".env", ".git/config", "backup", "database"];
    let archives = [".zip", ".tar", ".rar", ".bak", ".7z"];

    if sensitive.iter().any(|p| lower.contains(p)) {
        severity = match severity {
            Severity::Medium => Severity::High,
            Severity::Low => Severity::Medium,
            Severity::High => Severity::High,
        };
    } else if archives.iter().any(|p| lower.contains(p)) {
        if severity == Severity::Low {
            severity = Severity::Medium;
        }
    }

    severity
}

/// scheme://host[:port] of a URL, or None when it does not parse.
fn base_url_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

fn build_leak_record(
    http_status: u16,
    file_size: Option<i64>,
    file_type: Option<String>,
    url: &str,
) -> Option<LeakRecord> {
    // 404 means the path does not exist; never a leak.
    if http_status == 404 {
        return None;
    }
    let base_url = base_url_of(url)?;
    Some(LeakRecord {
        base_url,
        leaked_file_url: url.to_string(),
        file_type,
        severity: leak_severity(http_status, url),
        file_size,
        http_status,
    })
}

/// Parse the live stdout stream of the path-brute tool.
///
/// Lines look like `[<code>] <size> <time>s <content-type> <url>`;
/// anything else is ignored.
pub fn parse_leak_stdout(stdout: &str) -> Vec<LeakRecord> {
    let mut records = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        let Some(caps) = leak_line_pattern().captures(line) else {
            continue;
        };

        let Ok(http_status) = caps[1].parse::<u16>() else {
            warn!(line = %line, "skipping leak line with unparseable status");
            continue;
        };
        let file_size = caps[2].parse::<i64>().ok();
        let file_type = Some(caps[4].to_string());
        let url = caps[5].trim();

        if let Some(record) = build_leak_record(http_status, file_size, file_type, url) {
            records.push(record);
        }
    }

    records
}

/// Parse one per-status CSV file (columns Code, Length, Time, Type, URL).
///
/// `http_status` comes from the file name. Rows that do not carry a URL
/// are skipped. The caller is responsible for not feeding the 404 file.
pub fn parse_leak_csv(http_status: u16, content: &str) -> Vec<LeakRecord> {
    let mut lines = content.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };

    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();
    let url_idx = columns.iter().position(|c| c == "url");
    let length_idx = columns.iter().position(|c| c == "length");
    let type_idx = columns.iter().position(|c| c == "type");
    let Some(url_idx) = url_idx else {
        warn!("leak CSV has no URL column, skipping file");
        return Vec::new();
    };

    let mut records = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        // URL is the last column; bound the split so commas in it survive.
        let fields: Vec<&str> = line.splitn(columns.len(), ',').collect();
        let Some(url) = fields.get(url_idx).map(|u| u.trim()) else {
            continue;
        };
        if url.is_empty() {
            continue;
        }

        let file_size = length_idx
            .and_then(|i| fields.get(i))
            .and_then(|v| v.trim().parse::<i64>().ok());
        let file_type = type_idx
            .and_then(|i| fields.get(i))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        if let Some(record) = build_leak_record(http_status, file_size, file_type, url) {
            records.push(record);
        }
    }

    records
}

/// Fold CSV-sourced findings into the stdout-seeded set.
///
/// Stdout wins: a CSV row whose URL already appeared on stdout is
/// dropped.
pub fn merge_leak_records(
    stdout_records: Vec<LeakRecord>,
    csv_records: Vec<LeakRecord>,
) -> Vec<LeakRecord> {
    let seen: std::collections::HashSet<String> = stdout_records
        .iter()
        .map(|r| r.leaked_file_url.clone())
        .collect();

    let mut merged = stdout_records;
    for record in csv_records {
        if !seen.contains(&record.leaked_file_url) {
            merged.push(record);
        }
    }
    merged
}
