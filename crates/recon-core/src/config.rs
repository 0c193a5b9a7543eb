//! Tool and pipeline configuration.
//!
//! Settings are threaded through constructors rather than read from
//! globals. Precedence: environment (`RECOND_<KEY>`) > config file
//! (key=value lines) > defaults.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Enumerator mode for the graph-form producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmassMode {
    Passive,
    Active,
}

impl AmassMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
        }
    }
}

/// External tool paths, timeouts, and scanner options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for per-job artifact directories.
    pub jobs_dir: PathBuf,

    // Enumerators
    pub subfinder_path: PathBuf,
    pub subfinder_timeout_sec: u64,
    pub amass_path: PathBuf,
    pub amass_timeout_sec: u64,
    pub amass_mode: AmassMode,
    /// Per-run timeout passed to the tool itself, in minutes.
    pub amass_timeout_min: u64,
    pub amass_max_dns_queries: u64,
    pub assetfinder_path: PathBuf,
    pub assetfinder_timeout_sec: u64,

    // HTTP prober
    pub httpx_path: PathBuf,
    pub httpx_timeout_sec: u64,

    // Screenshot capture
    pub gowitness_path: PathBuf,
    pub gowitness_timeout_sec: u64,

    // WAF fingerprinter
    pub wafw00f_path: PathBuf,
    pub wafw00f_timeout_sec: u64,

    // Leak scanner (runs from its own install directory)
    pub leakscanner_enabled: bool,
    pub leakscanner_path: PathBuf,
    pub leakscanner_timeout_sec: u64,
    pub leakscanner_threads: u64,
    pub leakscanner_mode: String,
    pub python_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("./jobs"),
            subfinder_path: PathBuf::from("subfinder"),
            subfinder_timeout_sec: 600,
            amass_path: PathBuf::from("amass"),
            amass_timeout_sec: 1200,
            amass_mode: AmassMode::Passive,
            amass_timeout_min: 30,
            amass_max_dns_queries: 40,
            assetfinder_path: PathBuf::from("assetfinder"),
            assetfinder_timeout_sec: 300,
            httpx_path: PathBuf::from("httpx"),
            httpx_timeout_sec: 900,
            gowitness_path: PathBuf::from("gowitness"),
            gowitness_timeout_sec: 1800,
            wafw00f_path: PathBuf::from("wafw00f"),
            wafw00f_timeout_sec: 900,
            leakscanner_enabled: false,
            leakscanner_path: PathBuf::from("SourceLeakHacker.py"),
            leakscanner_timeout_sec: 1800,
            leakscanner_threads: 8,
            leakscanner_mode: "tiny".to_string(),
            python_path: PathBuf::from("python3"),
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Defaults merged with `RECOND_<KEY>` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Overlay environment variables on the current values.
    ///
    /// Each known key maps to `RECOND_` + the uppercased key name.
    /// Malformed env values are ignored with a warning rather than
    /// failing daemon startup.
    pub fn apply_env(&mut self) {
        for key in Self::KEYS {
            let var = format!("RECOND_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                if let Err(e) = self.apply_value(key, value.trim()) {
                    tracing::warn!(var = %var, error = %e, "ignoring invalid env override");
                }
            }
        }
    }

    const KEYS: &'static [&'static str] = &[
        "jobs_dir",
        "subfinder_path",
        "subfinder_timeout_sec",
        "amass_path",
        "amass_timeout_sec",
        "amass_mode",
        "amass_timeout_min",
        "amass_max_dns_queries",
        "assetfinder_path",
        "assetfinder_timeout_sec",
        "httpx_path",
        "httpx_timeout_sec",
        "gowitness_path",
        "gowitness_timeout_sec",
        "wafw00f_path",
        "wafw00f_timeout_sec",
        "leakscanner_enabled",
        "leakscanner_path",
        "leakscanner_timeout_sec",
        "leakscanner_threads",
        "leakscanner_mode",
        "python_path",
    ];

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "jobs_dir" => self.jobs_dir = PathBuf::from(value),
            "subfinder_path" => self.subfinder_path = PathBuf::from(value),
            "subfinder_timeout_sec" => self.subfinder_timeout_sec = Self::parse_int(key, value)?,
            "amass_path" => self.amass_path = PathBuf::from(value),
            "amass_timeout_sec" => self.amass_timeout_sec = Self::parse_int(key, value)?,
            "amass_mode" => {
                self.amass_mode = match value {
                    "passive" => AmassMode::Passive,
                    "active" => AmassMode::Active,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "amass_mode must be 'passive' or 'active', got '{value}'"
                        )))
                    }
                }
            }
            "amass_timeout_min" => self.amass_timeout_min = Self::parse_int(key, value)?,
            "amass_max_dns_queries" => self.amass_max_dns_queries = Self::parse_int(key, value)?,
            "assetfinder_path" => self.assetfinder_path = PathBuf::from(value),
            "assetfinder_timeout_sec" => {
                self.assetfinder_timeout_sec = Self::parse_int(key, value)?;
            }
            "httpx_path" => self.httpx_path = PathBuf::from(value),
            "httpx_timeout_sec" => self.httpx_timeout_sec = Self::parse_int(key, value)?,
            "gowitness_path" => self.gowitness_path = PathBuf::from(value),
            "gowitness_timeout_sec" => self.gowitness_timeout_sec = Self::parse_int(key, value)?,
            "wafw00f_path" => self.wafw00f_path = PathBuf::from(value),
            "wafw00f_timeout_sec" => self.wafw00f_timeout_sec = Self::parse_int(key, value)?,
            "leakscanner_enabled" => self.leakscanner_enabled = Self::parse_bool(key, value)?,
            "leakscanner_path" => self.leakscanner_path = PathBuf::from(value),
            "leakscanner_timeout_sec" => {
                self.leakscanner_timeout_sec = Self::parse_int(key, value)?;
            }
            "leakscanner_threads" => self.leakscanner_threads = Self::parse_int(key, value)?,
            "leakscanner_mode" => self.leakscanner_mode = value.to_string(),
            "python_path" => self.python_path = PathBuf::from(value),
            _ => {
                // Warn but don't fail for unknown keys.
                tracing::warn!(key = %key, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.jobs_dir, PathBuf::from("./jobs"));
        assert_eq!(config.subfinder_path, PathBuf::from("subfinder"));
        assert_eq!(config.subfinder_timeout_sec, 600);
        assert_eq!(config.amass_mode, AmassMode::Passive);
        assert_eq!(config.leakscanner_threads, 8);
        assert_eq!(config.leakscanner_mode, "tiny");
        assert!(!config.leakscanner_enabled);
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
jobs_dir="/var/lib/recond/jobs"
httpx_path=/usr/local/bin/httpx
httpx_timeout_sec=300
amass_mode=active
leakscanner_enabled=true
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.jobs_dir, PathBuf::from("/var/lib/recond/jobs"));
        assert_eq!(config.httpx_path, PathBuf::from("/usr/local/bin/httpx"));
        assert_eq!(config.httpx_timeout_sec, 300);
        assert_eq!(config.amass_mode, AmassMode::Active);
        assert!(config.leakscanner_enabled);
    }

    #[test]
    fn parse_rejects_invalid_amass_mode() {
        let mut config = Config::default();
        assert!(config.parse_content("amass_mode=turbo").is_err());
    }

    #[test]
    fn parse_rejects_non_numeric_timeout() {
        let mut config = Config::default();
        assert!(config.parse_content("httpx_timeout_sec=soon").is_err());
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(Config::parse_bool("test", "true").unwrap());
        assert!(Config::parse_bool("test", "1").unwrap());
        assert!(Config::parse_bool("test", "on").unwrap());
        assert!(!Config::parse_bool("test", "false").unwrap());
        assert!(!Config::parse_bool("test", "off").unwrap());
        assert!(Config::parse_bool("test", "maybe").is_err());
    }
}
